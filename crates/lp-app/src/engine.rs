//! Engine orchestration.
//!
//! Wires the track poller, the sync controller and a connectivity forwarder
//! into one running pipeline and exposes it through [`EngineHandle`].

use std::sync::Arc;
use std::time::Duration;

use lp_core::ports::{
    ArtworkResolverPort, ClockPort, PresenceSessionPort, SettingsPort, SnapshotSourcePort,
};
use lp_core::settings::model::CURRENT_SCHEMA_VERSION;
use lp_core::{ConnectionStatus, PlaybackSnapshot, PresenceState, Settings};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::controller::{ControllerCommand, ControllerDeps, SyncController};
use crate::events::EngineEvent;
use crate::poller::{TrackPoller, DEFAULT_SOURCE_TIMEOUT};

const TRACK_QUEUE_DEPTH: usize = 16;
const COMMAND_QUEUE_DEPTH: usize = 8;
const EVENT_CAPACITY: usize = 64;

pub struct EngineDeps {
    pub source: Arc<dyn SnapshotSourcePort>,
    pub resolver: Arc<dyn ArtworkResolverPort>,
    pub session: Arc<dyn PresenceSessionPort>,
    pub clock: Arc<dyn ClockPort>,
    pub settings: Arc<dyn SettingsPort>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on one snapshot source call.
    pub source_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is stopped")]
    Stopped,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to persist settings: {0:#}")]
    Persist(anyhow::Error),
}

/// Client of a running engine.
pub struct EngineHandle {
    commands: mpsc::Sender<ControllerCommand>,
    interval_tx: watch::Sender<Duration>,
    state_rx: watch::Receiver<PresenceState>,
    track_rx: watch::Receiver<Option<PlaybackSnapshot>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<EngineEvent>,
    settings: Arc<dyn SettingsPort>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Start the pipeline with the given initial settings.
///
/// The engine stops when `cancel` fires or [`EngineHandle::shutdown`] is called;
/// the resolver and session tasks behind the ports are owned by the caller.
pub fn start_engine(
    deps: EngineDeps,
    settings: &Settings,
    config: EngineConfig,
    cancel: CancellationToken,
) -> EngineHandle {
    let cancel = cancel.child_token();
    let (interval_tx, interval_rx) =
        watch::channel(Duration::from_secs(settings.effective_poll_interval_secs()));
    let (tracks_tx, tracks_rx) = mpsc::channel(TRACK_QUEUE_DEPTH);
    let (track_tx, track_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(PresenceState::Idle);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let status_rx = deps.session.status();

    let poller = TrackPoller::new(
        deps.source,
        config.source_timeout,
        interval_rx,
        tracks_tx,
        track_tx,
    )
    .spawn(cancel.clone());

    let controller = SyncController::new(
        ControllerDeps {
            resolver: deps.resolver,
            session: deps.session,
            clock: deps.clock,
        },
        settings,
        state_tx,
        events.clone(),
    )
    .spawn(tracks_rx, commands_rx, cancel.clone());

    let forwarder = spawn_connectivity_forwarder(status_rx.clone(), events.clone(), cancel.clone());

    info!(
        poll_interval_secs = settings.effective_poll_interval_secs(),
        enabled = settings.enable_on_launch,
        "Engine started"
    );

    EngineHandle {
        commands: commands_tx,
        interval_tx,
        state_rx,
        track_rx,
        status_rx,
        events,
        settings: deps.settings,
        cancel,
        tasks: vec![poller, controller, forwarder],
    }
}

fn spawn_connectivity_forwarder(
    mut status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            debug!("Presence session status closed");
                            break;
                        }
                        let current = status.borrow_and_update().clone();
                        debug!(status = ?current, "Connectivity changed");
                        let _ = events.send(EngineEvent::ConnectivityChanged(current));
                    }
                }
            }
        }
        .instrument(info_span!("app.connectivity_forwarder")),
    )
}

impl EngineHandle {
    /// What the controller last published.
    pub fn current_state(&self) -> PresenceState {
        self.state_rx.borrow().clone()
    }

    /// The last snapshot observed by the poller, change or not.
    pub fn current_track(&self) -> Option<PlaybackSnapshot> {
        self.track_rx.borrow().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Toggle publishing. Resolves once the controller has applied it.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        let (done, applied) = oneshot::channel();
        self.commands
            .send(ControllerCommand::SetEnabled { enabled, done })
            .await
            .map_err(|_| EngineError::Stopped)?;
        applied.await.map_err(|_| EngineError::Stopped)
    }

    /// Persist and apply new settings.
    ///
    /// A failed save is reported after the settings have been applied to the
    /// running engine.
    pub async fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        let span = info_span!("app.engine.update_settings");
        async {
            if settings.schema_version != CURRENT_SCHEMA_VERSION {
                return Err(EngineError::InvalidSettings(format!(
                    "expected schema version {CURRENT_SCHEMA_VERSION}, got {}",
                    settings.schema_version
                )));
            }

            let persisted = self.settings.save(&settings).await;

            self.interval_tx
                .send_replace(Duration::from_secs(settings.effective_poll_interval_secs()));
            let (done, applied) = oneshot::channel();
            self.commands
                .send(ControllerCommand::UpdateSettings { settings, done })
                .await
                .map_err(|_| EngineError::Stopped)?;
            applied.await.map_err(|_| EngineError::Stopped)?;

            match persisted {
                Ok(()) => {
                    info!("Settings updated");
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, "Settings applied but not saved");
                    Err(EngineError::Persist(err))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Stop the pipeline and wait for its tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Engine task failed during shutdown");
            }
        }
        info!("Engine stopped");
    }
}
