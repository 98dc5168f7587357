//! Synchronization controller task.
//!
//! Feeds poller events through the [`SyncMachine`], resolves artwork for new
//! tracks and drives the presence session. At most one artwork resolution is
//! outstanding; a newer decision aborts it, and the machine rejects any commit
//! that was superseded in the meantime.

use std::sync::Arc;

use lp_core::ports::{ArtworkResolverPort, ClockPort, PresenceSessionPort};
use lp_core::presence::{PublishPlan, SyncOptions};
use lp_core::{
    ActivityOptions, ActivityPayload, ArtworkRef, PlaybackSnapshot, PresenceState, Settings,
    SyncDecision, SyncMachine,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::events::EngineEvent;
use crate::poller::TrackChanged;

#[derive(Debug)]
pub enum ControllerCommand {
    SetEnabled {
        enabled: bool,
        done: oneshot::Sender<()>,
    },
    UpdateSettings {
        settings: Settings,
        done: oneshot::Sender<()>,
    },
}

pub struct ControllerDeps {
    pub resolver: Arc<dyn ArtworkResolverPort>,
    pub session: Arc<dyn PresenceSessionPort>,
    pub clock: Arc<dyn ClockPort>,
}

struct Resolved {
    plan: PublishPlan,
    artwork: ArtworkRef,
    observed_at: i64,
}

pub struct SyncController {
    deps: ControllerDeps,
    machine: SyncMachine,
    activity_options: ActivityOptions,
    enabled: bool,
    last_snapshot: Option<PlaybackSnapshot>,
    resolution: Option<JoinHandle<Resolved>>,
    state_tx: watch::Sender<PresenceState>,
    events: broadcast::Sender<EngineEvent>,
}

impl SyncController {
    pub fn new(
        deps: ControllerDeps,
        settings: &Settings,
        state_tx: watch::Sender<PresenceState>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            deps,
            machine: SyncMachine::new(SyncOptions::from_settings(settings)),
            activity_options: ActivityOptions::from_settings(settings),
            enabled: settings.enable_on_launch,
            last_snapshot: None,
            resolution: None,
            state_tx,
            events,
        }
    }

    pub fn spawn(
        self,
        tracks: mpsc::Receiver<TrackChanged>,
        commands: mpsc::Receiver<ControllerCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(
            self.run(tracks, commands, cancel)
                .instrument(info_span!("app.sync_controller")),
        )
    }

    async fn run(
        mut self,
        mut tracks: mpsc::Receiver<TrackChanged>,
        mut commands: mpsc::Receiver<ControllerCommand>,
        cancel: CancellationToken,
    ) {
        info!(enabled = self.enabled, "Sync controller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                track = tracks.recv() => match track {
                    Some(TrackChanged(snapshot)) => self.on_track(snapshot).await,
                    None => break,
                },
                resolved = join_pending(&mut self.resolution) => {
                    self.resolution = None;
                    self.on_resolved(resolved).await;
                }
            }
        }

        self.abort_resolution();
        self.deps.resolver.cancel_in_flight().await;
        info!("Sync controller stopped");
    }

    async fn on_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::SetEnabled { enabled, done } => {
                self.apply_enabled(enabled).await;
                let _ = done.send(());
            }
            ControllerCommand::UpdateSettings { settings, done } => {
                self.apply_settings(&settings).await;
                let _ = done.send(());
            }
        }
    }

    async fn on_track(&mut self, snapshot: Option<PlaybackSnapshot>) {
        self.last_snapshot = snapshot.clone();
        let _ = self.events.send(EngineEvent::TrackChanged(snapshot));
        if self.enabled {
            self.evaluate().await;
        }
    }

    /// Run the last observed snapshot through the machine.
    async fn evaluate(&mut self) {
        let now = self.deps.clock.now_secs();
        let decision = self.machine.on_snapshot(self.last_snapshot.as_ref(), now);
        match decision {
            SyncDecision::Unchanged => {}
            SyncDecision::Quiet => self.abort_resolution(),
            SyncDecision::Clear => {
                self.abort_resolution();
                debug!("Clearing presence");
                if let Err(err) = self.deps.session.clear_activity().await {
                    warn!(error = %err, "Failed to clear activity");
                }
                self.publish_state();
            }
            SyncDecision::Resolve(plan) => {
                self.abort_resolution();
                self.start_resolution(plan, now);
            }
            SyncDecision::Publish(plan, artwork) => {
                self.abort_resolution();
                self.publish(Resolved {
                    plan,
                    artwork,
                    observed_at: now,
                })
                .await;
            }
        }
    }

    fn start_resolution(&mut self, plan: PublishPlan, observed_at: i64) {
        debug!(title = %plan.snapshot.title, key = %plan.artwork_key(), "Resolving artwork");
        let resolver = Arc::clone(&self.deps.resolver);
        self.resolution = Some(tokio::spawn(async move {
            let artwork = resolver
                .resolve(&plan.snapshot.artist, &plan.snapshot.album)
                .await;
            Resolved {
                plan,
                artwork,
                observed_at,
            }
        }));
    }

    async fn on_resolved(&mut self, resolved: Result<Resolved, JoinError>) {
        match resolved {
            Ok(resolved) => self.publish(resolved).await,
            Err(err) => {
                warn!(error = %err, "Artwork resolution task failed");
                // Forget the pending plan so the next snapshot retries.
                self.machine.invalidate_published();
            }
        }
    }

    async fn publish(&mut self, resolved: Resolved) {
        let Resolved {
            plan,
            artwork,
            observed_at,
        } = resolved;
        let payload = ActivityPayload::build(
            &plan.snapshot,
            &artwork,
            plan.mode,
            &self.activity_options,
            observed_at,
        );
        if self.machine.commit(plan, artwork).is_none() {
            return;
        }
        debug!(details = %payload.details, state = %payload.state, "Publishing activity");
        if let Err(err) = self.deps.session.set_activity(payload).await {
            warn!(error = %err, "Failed to publish activity");
        }
        self.publish_state();
    }

    async fn apply_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        info!(enabled, "Presence publishing toggled");

        if enabled {
            if let Err(err) = self.deps.session.set_enabled(true).await {
                warn!(error = %err, "Failed to enable presence session");
            }
            self.evaluate().await;
            return;
        }

        self.abort_resolution();
        self.deps.resolver.cancel_in_flight().await;
        self.machine.reset_to_idle();
        if let Err(err) = self.deps.session.clear_activity().await {
            warn!(error = %err, "Failed to clear activity");
        }
        if let Err(err) = self.deps.session.set_enabled(false).await {
            warn!(error = %err, "Failed to disable presence session");
        }
        self.publish_state();
    }

    async fn apply_settings(&mut self, settings: &Settings) {
        let options = SyncOptions::from_settings(settings);
        let activity_options = ActivityOptions::from_settings(settings);
        let presentation_changed =
            options != self.machine.options() || activity_options != self.activity_options;

        self.machine.set_options(options);
        self.activity_options = activity_options;
        if presentation_changed {
            debug!("Presentation settings changed");
            self.machine.invalidate_published();
            self.abort_resolution();
        }

        if settings.enable_on_launch != self.enabled {
            self.apply_enabled(settings.enable_on_launch).await;
        } else if presentation_changed && self.enabled {
            self.evaluate().await;
        }
    }

    fn abort_resolution(&mut self) {
        if let Some(resolution) = self.resolution.take() {
            debug!("Superseding outstanding artwork resolution");
            resolution.abort();
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state().clone();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            let _ = self.events.send(EngineEvent::PresenceChanged(state));
        }
    }
}

async fn join_pending<T>(pending: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match pending {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
