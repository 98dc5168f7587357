//! Presence synchronization state machine
//!
//! Decides, for each observed snapshot, whether the published activity must change.
//!
//! # Design Principles
//!
//! - **Pure transitions**: `(state, snapshot, now) -> decision`, no I/O
//! - **Fingerprint gating**: a decision to publish is only produced when the
//!   fingerprint of the target activity no longer matches the published one
//! - **Superseding**: a pending artwork resolution is identified by its fingerprint;
//!   a commit for anything but the latest pending fingerprint is rejected
//!
//! # Architecture
//!
//! ```text
//! SyncMachine (lp-core)
//!   ├── on_snapshot: snapshot -> SyncDecision
//!   └── commit:      resolved plan -> PresenceState
//!
//! SyncController (lp-app)
//!   ├── receives poller events
//!   ├── runs artwork resolution for SyncDecision::Resolve
//!   └── drives the presence session
//! ```

use tracing::debug;

use crate::artwork::{cache_key, ArtworkRef};
use crate::playback::PlaybackSnapshot;
use crate::settings::model::{IdleBehavior, Settings};

use super::{Fingerprint, PresenceState, PublishMode};

/// Controller policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub idle_behavior: IdleBehavior,
    pub show_album_art: bool,
    /// Resolve artwork again when a paused track resumes, instead of reusing it.
    pub refresh_artwork_on_resume: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            idle_behavior: IdleBehavior::default(),
            show_album_art: true,
            refresh_artwork_on_resume: false,
        }
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            idle_behavior: settings.idle_behavior,
            show_album_art: settings.show_album_art,
            refresh_artwork_on_resume: settings.refresh_artwork_on_resume,
        }
    }
}

/// An activity waiting to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPlan {
    pub snapshot: PlaybackSnapshot,
    pub mode: PublishMode,
    pub fingerprint: Fingerprint,
}

impl PublishPlan {
    /// Normalized artwork key for this plan's track.
    pub fn artwork_key(&self) -> String {
        cache_key(&self.snapshot.artist, &self.snapshot.album)
    }
}

/// Outcome of feeding one snapshot to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    /// The target equals what is published or already pending. Nothing to do.
    Unchanged,
    /// Nothing to send; any pending resolution is superseded.
    Quiet,
    /// Send one clear-activity frame; any pending resolution is superseded.
    Clear,
    /// Resolve artwork for the plan, then commit it. Supersedes any older resolution.
    Resolve(PublishPlan),
    /// Artwork is already known; commit and publish right away.
    Publish(PublishPlan, ArtworkRef),
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    options: SyncOptions,
    state: PresenceState,
    published: Option<Fingerprint>,
    pending: Option<Fingerprint>,
    /// False until the next commit after the album art option changed.
    artwork_reusable: bool,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl SyncMachine {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            state: PresenceState::Idle,
            published: None,
            pending: None,
            artwork_reusable: true,
        }
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// Replace the policy. The published fingerprint is forgotten so the next
    /// snapshot is presented under the new options.
    pub fn set_options(&mut self, options: SyncOptions) {
        if self.options != options {
            if self.options.show_album_art != options.show_album_art {
                self.artwork_reusable = false;
            }
            self.options = options;
            self.published = None;
            self.pending = None;
        }
    }

    /// Forget the published fingerprint without touching the state.
    pub fn invalidate_published(&mut self) {
        self.published = None;
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn on_snapshot(
        &mut self,
        snapshot: Option<&PlaybackSnapshot>,
        now_secs: i64,
    ) -> SyncDecision {
        let target = snapshot.and_then(|s| self.target_mode(s).map(|mode| (s, mode)));

        let Some((snapshot, mode)) = target else {
            self.pending = None;
            if self.state.is_visible() {
                debug!(from = ?self.state.mode(), "presence withdrawn");
                self.state = PresenceState::Cleared;
                self.published = None;
                return SyncDecision::Clear;
            }
            return SyncDecision::Quiet;
        };

        let fingerprint = Fingerprint::of(snapshot, mode, now_secs);

        if self.pending.as_ref().is_some_and(|p| p.matches(&fingerprint)) {
            return SyncDecision::Unchanged;
        }
        if self.published.as_ref().is_some_and(|p| p.matches(&fingerprint)) {
            if self.pending.take().is_some() {
                return SyncDecision::Quiet;
            }
            return SyncDecision::Unchanged;
        }

        let plan = PublishPlan {
            snapshot: snapshot.clone(),
            mode,
            fingerprint: fingerprint.clone(),
        };
        self.pending = Some(fingerprint);

        match self.reusable_artwork(snapshot, mode) {
            Some(artwork) => SyncDecision::Publish(plan, artwork),
            None => SyncDecision::Resolve(plan),
        }
    }

    /// Record a plan as published. Returns `None` when the plan was superseded.
    pub fn commit(&mut self, plan: PublishPlan, artwork: ArtworkRef) -> Option<&PresenceState> {
        if self.pending.as_ref() != Some(&plan.fingerprint) {
            debug!(title = %plan.snapshot.title, "discarding superseded publish plan");
            return None;
        }
        self.pending = None;
        self.published = Some(plan.fingerprint);
        self.artwork_reusable = true;
        self.state = match plan.mode {
            PublishMode::Playing => PresenceState::Playing {
                snapshot: plan.snapshot,
                artwork,
            },
            PublishMode::Paused => PresenceState::Paused {
                snapshot: plan.snapshot,
                artwork,
            },
        };
        Some(&self.state)
    }

    pub fn reset_to_idle(&mut self) {
        self.state = PresenceState::Idle;
        self.published = None;
        self.pending = None;
    }

    fn target_mode(&self, snapshot: &PlaybackSnapshot) -> Option<PublishMode> {
        if snapshot.is_playing {
            return Some(PublishMode::Playing);
        }
        match self.options.idle_behavior {
            IdleBehavior::ShowPaused => Some(PublishMode::Paused),
            IdleBehavior::ClearStatus => None,
        }
    }

    fn reusable_artwork(&self, snapshot: &PlaybackSnapshot, mode: PublishMode) -> Option<ArtworkRef> {
        if !self.options.show_album_art {
            return Some(ArtworkRef::DefaultAsset);
        }
        if !self.artwork_reusable {
            return None;
        }
        let (shown, shown_artwork) = self.state.snapshot().zip(self.state.artwork())?;
        if !shown.same_track(snapshot) {
            return None;
        }
        let resuming = matches!(self.state, PresenceState::Paused { .. }) && mode == PublishMode::Playing;
        if resuming && self.options.refresh_artwork_on_resume {
            return None;
        }
        Some(shown_artwork.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn snapshot(position: f64, is_playing: bool) -> PlaybackSnapshot {
        PlaybackSnapshot::new("A", "B", "C", 200.0, position, is_playing)
    }

    fn art() -> ArtworkRef {
        ArtworkRef::Url("https://img/c.jpg".to_string())
    }

    fn publish_playing(machine: &mut SyncMachine) {
        let SyncDecision::Resolve(plan) = machine.on_snapshot(Some(&snapshot(10.0, true)), NOW) else {
            panic!("expected resolve");
        };
        assert!(machine.commit(plan, art()).is_some());
    }

    #[test]
    fn first_playing_snapshot_resolves_artwork() {
        let mut machine = SyncMachine::default();
        let decision = machine.on_snapshot(Some(&snapshot(10.0, true)), NOW);

        let SyncDecision::Resolve(plan) = decision else {
            panic!("expected resolve, got {decision:?}");
        };
        assert_eq!(plan.artwork_key(), "b::c");
        assert_eq!(plan.mode, PublishMode::Playing);
        assert_eq!(*machine.state(), PresenceState::Idle);

        let state = machine.commit(plan, art()).cloned();
        assert!(matches!(state, Some(PresenceState::Playing { .. })));
    }

    #[test]
    fn same_fingerprint_is_published_once() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);

        // Normal progression five seconds later keeps the fingerprint.
        let decision = machine.on_snapshot(Some(&snapshot(15.0, true)), NOW + 5);
        assert_eq!(decision, SyncDecision::Unchanged);
    }

    #[test]
    fn playback_across_a_window_edge_is_unchanged() {
        let mut machine = SyncMachine::default();
        let published = PlaybackSnapshot::new("A", "B", "C", 200.0, 7.6, true);
        let SyncDecision::Resolve(plan) = machine.on_snapshot(Some(&published), 1000) else {
            panic!("expected resolve");
        };
        assert!(machine.commit(plan, art()).is_some());

        // 4.8 s of playback over 5 wall seconds.
        let later = PlaybackSnapshot::new("A", "B", "C", 200.0, 12.4, true);
        assert_eq!(machine.on_snapshot(Some(&later), 1005), SyncDecision::Unchanged);
        let later = PlaybackSnapshot::new("A", "B", "C", 200.0, 18.1, true);
        assert_eq!(machine.on_snapshot(Some(&later), 1010), SyncDecision::Unchanged);
    }

    #[test]
    fn repeated_snapshot_while_resolving_is_unchanged() {
        let mut machine = SyncMachine::default();
        assert!(matches!(
            machine.on_snapshot(Some(&snapshot(10.0, true)), NOW),
            SyncDecision::Resolve(_)
        ));
        assert_eq!(
            machine.on_snapshot(Some(&snapshot(10.0, true)), NOW),
            SyncDecision::Unchanged
        );
    }

    #[test]
    fn seek_republishes_with_known_artwork() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);

        let decision = machine.on_snapshot(Some(&snapshot(120.0, true)), NOW + 5);
        let SyncDecision::Publish(plan, artwork) = decision else {
            panic!("expected publish, got {decision:?}");
        };
        assert_eq!(artwork, art());
        assert!(machine.commit(plan, artwork).is_some());
    }

    #[test]
    fn different_track_resolves_again() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);

        let next = PlaybackSnapshot::new("Other", "B", "C", 180.0, 0.0, true);
        assert!(matches!(
            machine.on_snapshot(Some(&next), NOW + 5),
            SyncDecision::Resolve(_)
        ));
    }

    #[test]
    fn absent_snapshot_clears_exactly_once() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);

        assert_eq!(machine.on_snapshot(None, NOW + 5), SyncDecision::Clear);
        assert_eq!(*machine.state(), PresenceState::Cleared);
        assert_eq!(machine.on_snapshot(None, NOW + 10), SyncDecision::Quiet);
    }

    #[test]
    fn absent_snapshot_from_idle_is_quiet() {
        let mut machine = SyncMachine::default();
        assert_eq!(machine.on_snapshot(None, NOW), SyncDecision::Quiet);
        assert_eq!(*machine.state(), PresenceState::Idle);
    }

    #[test]
    fn pause_with_clear_status_clears() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);
        assert_eq!(
            machine.on_snapshot(Some(&snapshot(20.0, false)), NOW + 10),
            SyncDecision::Clear
        );
    }

    #[test]
    fn pause_with_show_paused_publishes_paused_and_reuses_artwork() {
        let mut machine = SyncMachine::new(SyncOptions {
            idle_behavior: IdleBehavior::ShowPaused,
            ..SyncOptions::default()
        });
        publish_playing(&mut machine);

        let decision = machine.on_snapshot(Some(&snapshot(20.0, false)), NOW + 10);
        let SyncDecision::Publish(plan, artwork) = decision else {
            panic!("expected publish, got {decision:?}");
        };
        assert_eq!(plan.mode, PublishMode::Paused);
        machine.commit(plan, artwork);
        assert!(matches!(machine.state(), PresenceState::Paused { .. }));

        // Still paused a minute later: nothing new.
        assert_eq!(
            machine.on_snapshot(Some(&snapshot(20.0, false)), NOW + 70),
            SyncDecision::Unchanged
        );
    }

    #[test]
    fn resume_refreshes_artwork_only_when_configured() {
        for (refresh, expect_resolve) in [(false, false), (true, true)] {
            let mut machine = SyncMachine::new(SyncOptions {
                idle_behavior: IdleBehavior::ShowPaused,
                refresh_artwork_on_resume: refresh,
                ..SyncOptions::default()
            });
            publish_playing(&mut machine);
            let SyncDecision::Publish(plan, artwork) =
                machine.on_snapshot(Some(&snapshot(20.0, false)), NOW + 10)
            else {
                panic!("expected paused publish");
            };
            machine.commit(plan, artwork);

            let decision = machine.on_snapshot(Some(&snapshot(20.0, true)), NOW + 30);
            assert_eq!(matches!(decision, SyncDecision::Resolve(_)), expect_resolve);
        }
    }

    #[test]
    fn superseded_plan_is_rejected() {
        let mut machine = SyncMachine::default();
        let SyncDecision::Resolve(stale) = machine.on_snapshot(Some(&snapshot(10.0, true)), NOW)
        else {
            panic!("expected resolve");
        };
        let next = PlaybackSnapshot::new("Other", "X", "Y", 100.0, 0.0, true);
        let SyncDecision::Resolve(fresh) = machine.on_snapshot(Some(&next), NOW + 5) else {
            panic!("expected resolve");
        };

        assert!(machine.commit(stale, art()).is_none());
        assert_eq!(*machine.state(), PresenceState::Idle);
        assert!(machine.commit(fresh, ArtworkRef::DefaultAsset).is_some());
    }

    #[test]
    fn return_to_published_track_drops_pending() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);

        let next = PlaybackSnapshot::new("Other", "X", "Y", 100.0, 0.0, true);
        assert!(matches!(
            machine.on_snapshot(Some(&next), NOW + 5),
            SyncDecision::Resolve(_)
        ));
        assert_eq!(
            machine.on_snapshot(Some(&snapshot(15.0, true)), NOW + 5),
            SyncDecision::Quiet
        );
        assert!(!machine.has_pending());
    }

    #[test]
    fn album_art_disabled_uses_default_asset() {
        let mut machine = SyncMachine::new(SyncOptions {
            show_album_art: false,
            ..SyncOptions::default()
        });
        let decision = machine.on_snapshot(Some(&snapshot(10.0, true)), NOW);
        assert!(matches!(decision, SyncDecision::Publish(_, ArtworkRef::DefaultAsset)));
    }

    #[test]
    fn reset_and_option_changes_force_republish() {
        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);
        machine.reset_to_idle();
        assert_eq!(*machine.state(), PresenceState::Idle);
        assert!(matches!(
            machine.on_snapshot(Some(&snapshot(10.0, true)), NOW),
            SyncDecision::Resolve(_)
        ));

        let mut machine = SyncMachine::default();
        publish_playing(&mut machine);
        machine.set_options(SyncOptions {
            idle_behavior: IdleBehavior::ShowPaused,
            ..SyncOptions::default()
        });
        assert!(matches!(
            machine.on_snapshot(Some(&snapshot(10.0, true)), NOW),
            SyncDecision::Publish(_, _)
        ));
    }

    #[test]
    fn enabling_album_art_resolves_instead_of_reusing_default() {
        let mut machine = SyncMachine::new(SyncOptions {
            show_album_art: false,
            ..SyncOptions::default()
        });
        let SyncDecision::Publish(plan, artwork) = machine.on_snapshot(Some(&snapshot(10.0, true)), NOW)
        else {
            panic!("expected publish");
        };
        machine.commit(plan, artwork);

        machine.set_options(SyncOptions::default());
        assert!(matches!(
            machine.on_snapshot(Some(&snapshot(10.0, true)), NOW),
            SyncDecision::Resolve(_)
        ));
    }
}
