use serde::{Deserialize, Serialize};

use crate::artwork::ArtworkRef;
use crate::playback::PlaybackSnapshot;

/// What the controller last published to the presence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PresenceState {
    /// Nothing published yet, or publishing disabled.
    Idle,
    Playing {
        snapshot: PlaybackSnapshot,
        artwork: ArtworkRef,
    },
    /// Only reachable with the "show paused" idle behavior.
    Paused {
        snapshot: PlaybackSnapshot,
        artwork: ArtworkRef,
    },
    /// A previously visible activity was withdrawn.
    Cleared,
}

impl PresenceState {
    pub fn is_visible(&self) -> bool {
        matches!(self, PresenceState::Playing { .. } | PresenceState::Paused { .. })
    }

    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            PresenceState::Playing { snapshot, .. } | PresenceState::Paused { snapshot, .. } => {
                Some(snapshot)
            }
            PresenceState::Idle | PresenceState::Cleared => None,
        }
    }

    pub fn artwork(&self) -> Option<&ArtworkRef> {
        match self {
            PresenceState::Playing { artwork, .. } | PresenceState::Paused { artwork, .. } => {
                Some(artwork)
            }
            PresenceState::Idle | PresenceState::Cleared => None,
        }
    }

    pub fn mode(&self) -> Option<PublishMode> {
        match self {
            PresenceState::Playing { .. } => Some(PublishMode::Playing),
            PresenceState::Paused { .. } => Some(PublishMode::Paused),
            PresenceState::Idle | PresenceState::Cleared => None,
        }
    }
}

/// How a visible activity is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishMode {
    Playing,
    Paused,
}

/// Connectivity of the presence session, as shown to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}
