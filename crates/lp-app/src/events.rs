use lp_core::{ConnectionStatus, PlaybackSnapshot, PresenceState};
use serde::Serialize;

/// Notifications for the outer layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    /// The published presence changed.
    PresenceChanged(PresenceState),
    ConnectivityChanged(ConnectionStatus),
    /// The poller reported a playback change. `None` means nothing playing.
    TrackChanged(Option<PlaybackSnapshot>),
}
