use async_trait::async_trait;

use crate::playback::PlaybackSnapshot;
use crate::ports::errors::SourceError;

/// Reads the media player's current state.
///
/// Must be safe to call repeatedly and rapidly. `Ok(None)` means nothing is playing.
#[async_trait]
pub trait SnapshotSourcePort: Send + Sync {
    async fn current_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SourceError>;
}
