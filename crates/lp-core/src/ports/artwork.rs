use async_trait::async_trait;

use crate::artwork::ArtworkRef;
use crate::ports::errors::LookupError;

/// External image search, keyed by artist and album text.
#[async_trait]
pub trait ArtworkSearchPort: Send + Sync {
    /// Returns the image URL of the best match, or `None` when nothing matched.
    async fn search(&self, artist: &str, album: &str) -> Result<Option<String>, LookupError>;
}

/// Cached, rate-limited artwork resolution.
#[async_trait]
pub trait ArtworkResolverPort: Send + Sync {
    /// Never fails: every failure resolves to [`ArtworkRef::DefaultAsset`].
    async fn resolve(&self, artist: &str, album: &str) -> ArtworkRef;

    /// Abort outstanding external lookups. Waiting callers receive the default asset.
    async fn cancel_in_flight(&self);
}
