//! Artwork resolver task.
//!
//! The task owns both cache tiers and the [`RateBudget`]; every request passes
//! through its queue, so cache mutation is never concurrent. Requests for a key
//! whose lookup is already outstanding join that lookup instead of starting another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lp_core::ports::{ArtworkResolverPort, ArtworkSearchPort, ClockPort, LookupError};
use lp_core::{cache_key, ArtCacheEntry, ArtworkRef};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::disk_tier::DiskTier;
use super::memory_tier::MemoryTier;
use super::rate_budget::{RateBudget, DEFAULT_RATE_CAPACITY, DEFAULT_REFILL_INTERVAL, MAX_REFILL_INTERVAL};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const DONE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub memory_capacity: usize,
    pub ttl: chrono::Duration,
    /// Bound on one external search call.
    pub lookup_timeout: Duration,
    /// How long a request waits for a rate token before falling back.
    pub token_wait_timeout: Duration,
    /// Bound on a whole `resolve` call as seen by the caller.
    pub resolve_timeout: Duration,
    pub rate_capacity: u32,
    pub refill_interval: Duration,
    pub max_refill_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            memory_capacity: lp_core::artwork::DEFAULT_MEMORY_CAPACITY,
            ttl: chrono::Duration::days(lp_core::artwork::DEFAULT_TTL_DAYS),
            lookup_timeout: Duration::from_secs(10),
            token_wait_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(20),
            rate_capacity: DEFAULT_RATE_CAPACITY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            max_refill_interval: MAX_REFILL_INTERVAL,
        }
    }
}

enum ResolverCommand {
    Resolve {
        artist: String,
        album: String,
        reply: oneshot::Sender<ArtworkRef>,
    },
    CancelInFlight,
}

struct LookupDone {
    key: String,
    lookup_id: u64,
    outcome: Result<Option<String>, LookupError>,
}

struct Deferred {
    key: String,
    artist: String,
    album: String,
    deadline: Instant,
}

/// Cloneable client of the resolver task.
#[derive(Clone)]
pub struct ArtworkResolverHandle {
    tx: mpsc::Sender<ResolverCommand>,
    resolve_timeout: Duration,
}

#[async_trait]
impl ArtworkResolverPort for ArtworkResolverHandle {
    async fn resolve(&self, artist: &str, album: &str) -> ArtworkRef {
        let (reply, rx) = oneshot::channel();
        let command = ResolverCommand::Resolve {
            artist: artist.to_string(),
            album: album.to_string(),
            reply,
        };
        if self.tx.send(command).await.is_err() {
            debug!("Artwork resolver stopped; using default asset");
            return ArtworkRef::DefaultAsset;
        }
        match timeout(self.resolve_timeout, rx).await {
            Ok(Ok(artwork)) => artwork,
            Ok(Err(_)) => ArtworkRef::DefaultAsset,
            Err(_) => {
                warn!(artist, album, "Artwork resolution timed out; using default asset");
                ArtworkRef::DefaultAsset
            }
        }
    }

    async fn cancel_in_flight(&self) {
        let _ = self.tx.send(ResolverCommand::CancelInFlight).await;
    }
}

/// Start the resolver task over pre-loaded tiers.
pub fn spawn_artwork_resolver(
    search: Arc<dyn ArtworkSearchPort>,
    clock: Arc<dyn ClockPort>,
    disk: DiskTier,
    config: ResolverConfig,
    cancel: CancellationToken,
) -> (ArtworkResolverHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (done_tx, done_rx) = mpsc::channel(DONE_CHANNEL_CAPACITY);
    let handle = ArtworkResolverHandle {
        tx,
        resolve_timeout: config.resolve_timeout,
    };
    let task = ResolverTask {
        memory: MemoryTier::new(config.memory_capacity),
        budget: RateBudget::new(
            config.rate_capacity,
            config.refill_interval,
            config.max_refill_interval,
            Instant::now(),
        ),
        disk,
        search,
        clock,
        config,
        done_tx,
        waiters: HashMap::new(),
        lookups: HashMap::new(),
        deferred: VecDeque::new(),
        next_lookup_id: 0,
    };
    let join = tokio::spawn(
        task.run(rx, done_rx, cancel)
            .instrument(info_span!("infra.artwork_resolver")),
    );
    (handle, join)
}

struct ResolverTask {
    memory: MemoryTier,
    disk: DiskTier,
    budget: RateBudget,
    search: Arc<dyn ArtworkSearchPort>,
    clock: Arc<dyn ClockPort>,
    config: ResolverConfig,
    done_tx: mpsc::Sender<LookupDone>,
    /// Callers waiting on a key, whether its lookup is running or deferred.
    waiters: HashMap<String, Vec<oneshot::Sender<ArtworkRef>>>,
    lookups: HashMap<String, (u64, AbortHandle)>,
    deferred: VecDeque<Deferred>,
    next_lookup_id: u64,
}

impl ResolverTask {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<ResolverCommand>,
        mut done_rx: mpsc::Receiver<LookupDone>,
        cancel: CancellationToken,
    ) {
        info!(
            memory_capacity = self.memory.capacity(),
            disk_entries = self.disk.len(),
            "Artwork resolver started"
        );
        loop {
            let wakeup = self.next_wakeup();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.apply_finished(&mut done_rx).await;
                    self.cancel_all();
                    break;
                }
                command = rx.recv() => match command {
                    Some(ResolverCommand::Resolve { artist, album, reply }) => {
                        self.on_resolve(artist, album, reply);
                    }
                    Some(ResolverCommand::CancelInFlight) => self.cancel_all(),
                    None => {
                        self.apply_finished(&mut done_rx).await;
                        break;
                    }
                },
                Some(done) = done_rx.recv() => self.on_lookup_done(done).await,
                _ = sleep_until_opt(wakeup) => self.drain_deferred(),
            }
        }
        info!("Artwork resolver stopped");
    }

    fn on_resolve(&mut self, artist: String, album: String, reply: oneshot::Sender<ArtworkRef>) {
        let key = cache_key(&artist, &album);
        if key.is_empty() {
            let _ = reply.send(ArtworkRef::DefaultAsset);
            return;
        }

        let now = self.clock.now_utc();
        if let Some(entry) = self.memory.get(&key, now, self.config.ttl) {
            debug!(key = %key, "Artwork memory hit");
            let _ = reply.send(entry.artwork());
            return;
        }
        if let Some(entry) = self.disk.get(&key, now) {
            debug!(key = %key, "Artwork disk hit");
            let artwork = entry.artwork();
            self.memory.insert(entry);
            let _ = reply.send(artwork);
            return;
        }

        if let Some(waiting) = self.waiters.get_mut(&key) {
            debug!(key = %key, "Joining outstanding artwork lookup");
            waiting.push(reply);
            return;
        }
        self.waiters.insert(key.clone(), vec![reply]);

        let now = Instant::now();
        if self.budget.try_acquire(now) {
            self.start_lookup(key, artist, album);
        } else {
            debug!(key = %key, "No rate token; deferring artwork lookup");
            self.deferred.push_back(Deferred {
                key,
                artist,
                album,
                deadline: now + self.config.token_wait_timeout,
            });
        }
    }

    fn start_lookup(&mut self, key: String, artist: String, album: String) {
        self.next_lookup_id += 1;
        let lookup_id = self.next_lookup_id;
        let search = Arc::clone(&self.search);
        let done_tx = self.done_tx.clone();
        let lookup_timeout = self.config.lookup_timeout;
        let task_key = key.clone();

        let join = tokio::spawn(async move {
            let outcome = match timeout(lookup_timeout, search.search(&artist, &album)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(LookupError::Timeout),
            };
            let _ = done_tx
                .send(LookupDone {
                    key: task_key,
                    lookup_id,
                    outcome,
                })
                .await;
        });
        self.lookups.insert(key, (lookup_id, join.abort_handle()));
    }

    async fn on_lookup_done(&mut self, done: LookupDone) {
        let LookupDone {
            key,
            lookup_id,
            outcome,
        } = done;

        let current = matches!(self.lookups.get(&key), Some((id, _)) if *id == lookup_id);
        if current {
            self.lookups.remove(&key);
        }

        let mut decided_write = None;
        let artwork = match outcome {
            Ok(Some(url)) => {
                self.budget.on_success();
                let entry = ArtCacheEntry::new(key.clone(), url, self.now_utc());
                self.memory.insert(entry.clone());
                let artwork = entry.artwork();
                decided_write = Some(entry);
                artwork
            }
            Ok(None) => {
                self.budget.on_success();
                debug!(key = %key, "No artwork found");
                ArtworkRef::DefaultAsset
            }
            Err(err) => {
                if err.is_rate_limited() {
                    self.budget.penalize(Instant::now());
                    warn!(
                        key = %key,
                        refill_interval_ms = self.budget.refill_interval().as_millis() as u64,
                        "Artwork search rate limited; backing off"
                    );
                } else {
                    warn!(key = %key, error = %err, "Artwork lookup failed");
                }
                ArtworkRef::DefaultAsset
            }
        };

        if current {
            for waiter in self.waiters.remove(&key).unwrap_or_default() {
                let _ = waiter.send(artwork.clone());
            }
        }

        // A superseded lookup still records a positive result.
        if let Some(entry) = decided_write {
            if let Err(err) = self.disk.insert(entry).await {
                warn!(key = %key, error = %err, "Failed to persist artwork cache entry");
            }
        }
    }

    /// Apply lookups that completed but were not yet handled, so their cache
    /// writes survive shutdown.
    async fn apply_finished(&mut self, done_rx: &mut mpsc::Receiver<LookupDone>) {
        while let Ok(done) = done_rx.try_recv() {
            self.on_lookup_done(done).await;
        }
    }

    fn drain_deferred(&mut self) {
        let now = Instant::now();
        while !self.deferred.is_empty() && self.budget.try_acquire(now) {
            if let Some(next) = self.deferred.pop_front() {
                self.start_lookup(next.key, next.artist, next.album);
            }
        }

        let mut expired = Vec::new();
        self.deferred.retain(|deferred| {
            if deferred.deadline <= now {
                expired.push(deferred.key.clone());
                false
            } else {
                true
            }
        });
        for key in expired {
            debug!(key = %key, "Rate token wait timed out; using default asset");
            for waiter in self.waiters.remove(&key).unwrap_or_default() {
                let _ = waiter.send(ArtworkRef::DefaultAsset);
            }
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let now = Instant::now();
        let earliest_deadline = self.deferred.iter().map(|d| d.deadline).min()?;
        Some(earliest_deadline.min(self.budget.next_available(now)))
    }

    fn cancel_all(&mut self) {
        if self.lookups.is_empty() && self.deferred.is_empty() {
            return;
        }
        info!(
            lookups = self.lookups.len(),
            deferred = self.deferred.len(),
            "Cancelling outstanding artwork lookups"
        );
        for (_, (_, abort)) in self.lookups.drain() {
            abort.abort();
        }
        self.deferred.clear();
        for (_, waiting) in self.waiters.drain() {
            for waiter in waiting {
                let _ = waiter.send(ArtworkRef::DefaultAsset);
            }
        }
    }

    fn now_utc(&self) -> chrono::DateTime<Utc> {
        self.clock.now_utc()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
