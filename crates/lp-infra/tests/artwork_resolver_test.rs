//! Artwork resolver tests: cache tiers, lookup sharing and the rate budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lp_core::ports::{ArtworkResolverPort, ArtworkSearchPort, ClockPort, LookupError};
use lp_core::{ArtCacheEntry, ArtworkRef};
use lp_infra::artwork::{DiskTier, DEFAULT_ART_CACHE_FILE};
use lp_infra::{spawn_artwork_resolver, ArtworkResolverHandle, ResolverConfig};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const URL: &str = "https://is1.mzstatic.com/image/thumb/c/512x512bb.jpg";

// ---------------------------------------------------------------------------
// Fake: ArtworkSearchPort (scripted responses, call counter, optional delay or gate)
// ---------------------------------------------------------------------------

struct FakeSearch {
    calls: Arc<AtomicUsize>,
    responses: Mutex<VecDeque<Result<Option<String>, LookupError>>>,
    fallback: Result<Option<String>, LookupError>,
    delay: Duration,
    gate: Option<Arc<Notify>>,
}

impl FakeSearch {
    fn always(result: Result<Option<String>, LookupError>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: Mutex::new(VecDeque::new()),
            fallback: result,
            delay: Duration::ZERO,
            gate: None,
        }
    }

    fn scripted(responses: Vec<Result<Option<String>, LookupError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::always(Ok(None))
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold every search until the gate is notified.
    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl ArtworkSearchPort for FakeSearch {
    async fn search(&self, _artist: &str, _album: &str) -> Result<Option<String>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

// ---------------------------------------------------------------------------
// Fake: ClockPort (settable wall clock)
// ---------------------------------------------------------------------------

struct TestClock {
    now_ms: AtomicI64,
}

impl TestClock {
    fn new() -> Self {
        Self {
            now_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn advance_days(&self, days: i64) {
        self.now_ms
            .fetch_add(days * 24 * 60 * 60 * 1000, Ordering::SeqCst);
    }
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

struct Harness {
    resolver: ArtworkResolverHandle,
    calls: Arc<AtomicUsize>,
    clock: Arc<TestClock>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    dir: TempDir,
}

async fn start(search: FakeSearch, config: ResolverConfig) -> Harness {
    start_with_disk(search, config, Vec::new()).await
}

async fn start_with_disk(
    search: FakeSearch,
    config: ResolverConfig,
    seeded: Vec<ArtCacheEntry>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(TestClock::new());
    let mut disk = DiskTier::load(
        dir.path().join(DEFAULT_ART_CACHE_FILE),
        config.ttl,
        clock.now_utc(),
    )
    .await;
    for entry in seeded {
        disk.insert(entry).await.unwrap();
    }

    let calls = Arc::clone(&search.calls);
    let cancel = CancellationToken::new();
    let (resolver, join) = spawn_artwork_resolver(
        Arc::new(search),
        clock.clone(),
        disk,
        config,
        cancel.clone(),
    );
    Harness {
        resolver,
        calls,
        clock,
        cancel,
        join,
        dir,
    }
}

#[tokio::test]
async fn test_resolved_artwork_is_cached_in_both_tiers() {
    let h = start(FakeSearch::always(Ok(Some(URL.to_string()))), ResolverConfig::default()).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::Url(URL.to_string()));
    assert_eq!(h.resolver.resolve("b ", " c").await, ArtworkRef::Url(URL.to_string()));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    h.cancel.cancel();
    h.join.await.unwrap();

    let raw = tokio::fs::read_to_string(h.dir.path().join(DEFAULT_ART_CACHE_FILE))
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["entries"]["b::c"]["url"], URL);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_lookup() {
    let search = FakeSearch::always(Ok(Some(URL.to_string()))).with_delay(Duration::from_millis(200));
    let h = start(search, ResolverConfig::default()).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let resolver = h.resolver.clone();
        tasks.push(tokio::spawn(async move { resolver.resolve("B", "C").await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), ArtworkRef::Url(URL.to_string()));
    }
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disk_hit_skips_external_search() {
    let seeded = vec![ArtCacheEntry::new("b::c", URL, Utc::now())];
    let h = start_with_disk(FakeSearch::always(Ok(None)), ResolverConfig::default(), seeded).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::Url(URL.to_string()));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_artist_and_album_is_default_without_lookup() {
    let h = start(FakeSearch::always(Ok(Some(URL.to_string()))), ResolverConfig::default()).await;
    assert_eq!(h.resolver.resolve("  ", "").await, ArtworkRef::DefaultAsset);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_is_not_cached_and_retried() {
    let search = FakeSearch::scripted(vec![Ok(None), Ok(Some(URL.to_string()))]);
    let h = start(search, ResolverConfig::default()).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::DefaultAsset);
    // Second call waits for the next rate token, then searches again.
    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::Url(URL.to_string()));
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_token_wait_timeout_falls_back_to_default() {
    let config = ResolverConfig {
        refill_interval: Duration::from_secs(10),
        token_wait_timeout: Duration::from_secs(1),
        ..ResolverConfig::default()
    };
    let h = start(FakeSearch::always(Ok(Some(URL.to_string()))), config).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::Url(URL.to_string()));
    assert_eq!(h.resolver.resolve("X", "Y").await, ArtworkRef::DefaultAsset);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_response_slows_the_next_lookup() {
    let search = FakeSearch::scripted(vec![Err(LookupError::RateLimited), Ok(Some(URL.to_string()))]);
    let h = start(search, ResolverConfig::default()).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::DefaultAsset);

    let started = tokio::time::Instant::now();
    assert_eq!(h.resolver.resolve("X", "Y").await, ArtworkRef::Url(URL.to_string()));
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_triggers_a_new_lookup() {
    let h = start(FakeSearch::always(Ok(Some(URL.to_string()))), ResolverConfig::default()).await;

    h.resolver.resolve("B", "C").await;
    h.clock.advance_days(31);
    h.resolver.resolve("B", "C").await;

    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_lookup_times_out_to_default() {
    let search = FakeSearch::always(Ok(Some(URL.to_string()))).with_delay(Duration::from_secs(60));
    let config = ResolverConfig {
        lookup_timeout: Duration::from_secs(10),
        ..ResolverConfig::default()
    };
    let h = start(search, config).await;

    assert_eq!(h.resolver.resolve("B", "C").await, ArtworkRef::DefaultAsset);
}

#[tokio::test]
async fn test_cancel_in_flight_releases_waiters() {
    let search = FakeSearch::always(Ok(Some(URL.to_string()))).with_delay(Duration::from_secs(3600));
    let h = start(search, ResolverConfig::default()).await;

    let resolver = h.resolver.clone();
    let pending = tokio::spawn(async move { resolver.resolve("B", "C").await });
    while h.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    h.resolver.cancel_in_flight().await;
    assert_eq!(pending.await.unwrap(), ArtworkRef::DefaultAsset);
}

#[tokio::test]
async fn test_lookup_finished_at_shutdown_is_still_persisted() {
    let gate = Arc::new(Notify::new());
    let search = FakeSearch::always(Ok(Some(URL.to_string()))).gated(Arc::clone(&gate));
    let h = start(search, ResolverConfig::default()).await;

    let resolver = h.resolver.clone();
    let pending = tokio::spawn(async move { resolver.resolve("B", "C").await });
    while h.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // The lookup completes in the same turn the resolver is told to stop.
    gate.notify_one();
    h.cancel.cancel();
    h.join.await.unwrap();

    assert_eq!(pending.await.unwrap(), ArtworkRef::Url(URL.to_string()));
    let raw = tokio::fs::read_to_string(h.dir.path().join(DEFAULT_ART_CACHE_FILE))
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["entries"]["b::c"]["url"], URL);
}
