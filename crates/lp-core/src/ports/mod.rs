//! Port interfaces for the application layer
//!
//! Ports define the contract between the synchronization logic and the
//! infrastructure/platform implementations (media player, artwork search,
//! presence service, filesystem, clock).

pub mod app_dirs;
pub mod artwork;
mod clock;
pub mod errors;
pub mod presence_session;
pub mod settings;
pub mod snapshot_source;

pub use clock::*;

pub use app_dirs::AppDirsPort;
pub use artwork::{ArtworkResolverPort, ArtworkSearchPort};
pub use errors::{AppDirsError, LookupError, SessionError, SourceError};
pub use presence_session::PresenceSessionPort;
pub use settings::SettingsPort;
pub use snapshot_source::SnapshotSourcePort;
