use async_trait::async_trait;
use tokio::sync::watch;

use crate::ports::errors::SessionError;
use crate::presence::{ActivityPayload, ConnectionStatus};

/// Client side of the presence session task.
///
/// Calls only hand the request to the session; delivery happens once the link is
/// ready, and the latest request is replayed after every reconnect.
#[async_trait]
pub trait PresenceSessionPort: Send + Sync {
    async fn set_activity(&self, activity: ActivityPayload) -> Result<(), SessionError>;

    async fn clear_activity(&self) -> Result<(), SessionError>;

    /// Disabling clears the activity and stops reconnect attempts; an open link stays
    /// open. Enabling starts connecting if no link exists.
    async fn set_enabled(&self, enabled: bool) -> Result<(), SessionError>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}
