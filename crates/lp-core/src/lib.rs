//! # lp-core
//!
//! Core domain models and business logic for Listening Presence.
//!
//! This crate contains pure business logic without any infrastructure dependencies:
//! playback snapshots, the presence decision state machine, artwork cache entries,
//! settings models and the ports implemented by the outer layers.

pub mod app_dirs;
pub mod artwork;
pub mod config;
pub mod playback;
pub mod ports;
pub mod presence;
pub mod reconnect;
pub mod settings;

// Re-export commonly used types at the crate root
pub use artwork::{cache_key, ArtCacheEntry, ArtworkRef};
pub use config::AppConfig;
pub use playback::PlaybackSnapshot;
pub use presence::{
    ActivityOptions, ActivityPayload, ConnectionStatus, Fingerprint, PresenceState, PublishMode,
    SyncDecision, SyncMachine,
};
pub use reconnect::ReconnectBackoff;
pub use settings::model::{DisplayFormat, IdleBehavior, Settings};
