//! # lp-platform
//!
//! Platform adapters for Listening Presence: application directories, the
//! presence service IPC client and media player snapshot sources.

pub mod app_dirs;
pub mod ipc;
pub mod snapshot;

pub use app_dirs::DirsAppDirsAdapter;
pub use ipc::{spawn_presence_session, LocalIpcConnector, PresenceSessionHandle, SessionConfig};
pub use snapshot::CommandSnapshotSource;
