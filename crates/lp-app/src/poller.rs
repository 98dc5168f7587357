//! Track poller: periodic snapshot observation with change detection.

use std::sync::Arc;
use std::time::Duration;

use lp_core::playback::observation_changed;
use lp_core::ports::{SnapshotSourcePort, SourceError};
use lp_core::settings::model::{MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};
use lp_core::PlaybackSnapshot;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(3);

/// A change in what the media player reports. `None` means nothing playing.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackChanged(pub Option<PlaybackSnapshot>);

/// Clamp a requested poll interval into the supported range.
pub fn clamp_poll_interval(requested: Duration) -> Duration {
    requested.clamp(
        Duration::from_secs(MIN_POLL_INTERVAL_SECS),
        Duration::from_secs(MAX_POLL_INTERVAL_SECS),
    )
}

pub struct TrackPoller {
    source: Arc<dyn SnapshotSourcePort>,
    source_timeout: Duration,
    interval_rx: watch::Receiver<Duration>,
    events: mpsc::Sender<TrackChanged>,
    current_track: watch::Sender<Option<PlaybackSnapshot>>,
}

impl TrackPoller {
    pub fn new(
        source: Arc<dyn SnapshotSourcePort>,
        source_timeout: Duration,
        interval_rx: watch::Receiver<Duration>,
        events: mpsc::Sender<TrackChanged>,
        current_track: watch::Sender<Option<PlaybackSnapshot>>,
    ) -> Self {
        Self {
            source,
            source_timeout,
            interval_rx,
            events,
            current_track,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel).instrument(info_span!("app.track_poller")))
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut period = clamp_poll_interval(*self.interval_rx.borrow_and_update());
        let mut ticker = poll_ticker(Instant::now(), period);
        let mut interval_open = true;
        let mut in_flight: Option<JoinHandle<Option<PlaybackSnapshot>>> = None;
        let mut last_emitted: Option<PlaybackSnapshot> = None;
        info!(interval_ms = period.as_millis() as u64, "Track poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = self.interval_rx.changed(), if interval_open => {
                    if changed.is_err() {
                        // Interval owner went away; keep the current period.
                        interval_open = false;
                        continue;
                    }
                    let requested = *self.interval_rx.borrow_and_update();
                    let next = clamp_poll_interval(requested);
                    if next != period {
                        info!(interval_ms = next.as_millis() as u64, "Poll interval changed");
                        period = next;
                        ticker = poll_ticker(Instant::now() + period, period);
                    }
                }
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        debug!("Previous poll still outstanding; skipping tick");
                        continue;
                    }
                    in_flight = Some(self.start_poll());
                }
                observed = join_pending(&mut in_flight) => {
                    in_flight = None;
                    let observation = match observed {
                        Ok(observation) => observation,
                        Err(err) => {
                            warn!(error = %err, "Poll task failed");
                            None
                        }
                    };
                    if !self.on_observation(observation, &mut last_emitted).await {
                        break;
                    }
                }
            }
        }

        if let Some(poll) = in_flight.take() {
            poll.abort();
        }
        info!("Track poller stopped");
    }

    fn start_poll(&self) -> JoinHandle<Option<PlaybackSnapshot>> {
        let source = Arc::clone(&self.source);
        let source_timeout = self.source_timeout;
        tokio::spawn(async move {
            let result = match timeout(source_timeout, source.current_snapshot()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            };
            match result {
                Ok(snapshot) => snapshot.map(PlaybackSnapshot::clamped),
                Err(SourceError::NotRunning) => {
                    trace!("Media player not running");
                    None
                }
                Err(err) => {
                    debug!(error = %err, "Snapshot source failed; treating as nothing playing");
                    None
                }
            }
        })
    }

    /// Returns false once nobody listens for change events.
    async fn on_observation(
        &self,
        observation: Option<PlaybackSnapshot>,
        last_emitted: &mut Option<PlaybackSnapshot>,
    ) -> bool {
        self.current_track.send_replace(observation.clone());

        if !observation_changed(last_emitted.as_ref(), observation.as_ref()) {
            return true;
        }
        debug!(
            title = observation.as_ref().map(|s| s.title.as_str()).unwrap_or_default(),
            playing = observation.as_ref().is_some_and(|s| s.is_playing),
            "Playback changed"
        );
        *last_emitted = observation.clone();
        self.events.send(TrackChanged(observation)).await.is_ok()
    }
}

fn poll_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn join_pending<T>(pending: &mut Option<JoinHandle<T>>) -> Result<T, tokio::task::JoinError> {
    match pending {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Source {}

        #[async_trait]
        impl SnapshotSourcePort for Source {
            async fn current_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SourceError>;
        }
    }

    fn playing(position: f64) -> PlaybackSnapshot {
        PlaybackSnapshot::new("A", "B", "C", 200.0, position, true)
    }

    struct Running {
        events: mpsc::Receiver<TrackChanged>,
        current: watch::Receiver<Option<PlaybackSnapshot>>,
        interval_tx: watch::Sender<Duration>,
        cancel: CancellationToken,
        join: JoinHandle<()>,
    }

    fn spawn(source: impl SnapshotSourcePort + 'static, interval: Duration) -> Running {
        let (events_tx, events) = mpsc::channel(16);
        let (current_tx, current) = watch::channel(None);
        let (interval_tx, interval_rx) = watch::channel(interval);
        let cancel = CancellationToken::new();
        let poller = TrackPoller::new(
            Arc::new(source),
            DEFAULT_SOURCE_TIMEOUT,
            interval_rx,
            events_tx,
            current_tx,
        );
        let join = poller.spawn(cancel.clone());
        Running {
            events,
            current,
            interval_tx,
            cancel,
            join,
        }
    }

    #[test]
    fn interval_is_clamped_into_range() {
        assert_eq!(clamp_poll_interval(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(clamp_poll_interval(Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(clamp_poll_interval(Duration::from_secs(60)), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_jitter_emits_one_event() {
        let positions = [10.0, 10.4, 10.9, 10.2];
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = MockSource::new();
        let counter = Arc::clone(&calls);
        source.expect_current_snapshot().returning(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(playing(positions[n.min(positions.len() - 1)])))
        });
        let mut running = spawn(source, Duration::from_secs(5));

        let first = running.events.recv().await.unwrap();
        assert_eq!(first, TrackChanged(Some(playing(10.0))));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert!(running.events.try_recv().is_err());
        // The last known snapshot still follows every observation.
        assert_eq!(*running.current.borrow(), Some(playing(10.2)));
    }

    #[tokio::test(start_paused = true)]
    async fn source_failure_reads_as_nothing_playing() {
        let mut source = MockSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_current_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Some(playing(10.0))));
        source
            .expect_current_snapshot()
            .in_sequence(&mut seq)
            .returning(|| Err(SourceError::Unavailable("osascript missing".into())));
        let mut running = spawn(source, Duration::from_secs(2));

        assert!(running.events.recv().await.unwrap().0.is_some());
        assert_eq!(running.events.recv().await.unwrap(), TrackChanged(None));
        assert_eq!(*running.current.borrow(), None);
    }

    struct SlowSource {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl SnapshotSourcePort for SlowSource {
        async fn current_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Some(playing(10.0)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_poll_skips_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = SlowSource {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(2500),
        };
        let mut running = spawn(source, Duration::from_secs(2));

        running.events.recv().await.unwrap();
        // Ticks at 0, 2, 4, 6; the one at 2 falls inside the first poll.
        tokio::time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        running.cancel.cancel();
        running.join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_source_times_out() {
        let source = SlowSource {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_secs(3600),
        };
        let mut running = spawn(source, Duration::from_secs(5));
        running.current.changed().await.unwrap();
        assert_eq!(*running.current.borrow(), None);
        assert!(running.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_updates_apply_clamped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = MockSource::new();
        let counter = Arc::clone(&calls);
        source.expect_current_snapshot().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        let running = spawn(source, Duration::from_secs(15));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Below the minimum: polls every 2 s.
        running.interval_tx.send(Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(6050)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
