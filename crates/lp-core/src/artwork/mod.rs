//! Artwork references and cache entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries held by the in-memory artwork tier.
pub const DEFAULT_MEMORY_CAPACITY: usize = 500;

/// Entries older than this are treated as misses in every tier.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Resolved image locator, or the sentinel meaning "use the bundled asset".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtworkRef {
    Url(String),
    DefaultAsset,
}

impl ArtworkRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            ArtworkRef::Url(url) => Some(url),
            ArtworkRef::DefaultAsset => None,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ArtworkRef::DefaultAsset)
    }
}

/// Normalized cache key: case-folded, trimmed `"artist::album"`.
///
/// An empty album collapses the key to the artist alone.
pub fn cache_key(artist: &str, album: &str) -> String {
    let artist = artist.trim().to_lowercase();
    let album = album.trim().to_lowercase();
    if album.is_empty() {
        artist
    } else {
        format!("{artist}::{album}")
    }
}

/// A positive artwork resolution. Negative results are never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtCacheEntry {
    pub key: String,
    pub url: String,
    pub resolved_at: DateTime<Utc>,
}

impl ArtCacheEntry {
    pub fn new(key: impl Into<String>, url: impl Into<String>, resolved_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            resolved_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.resolved_at) >= ttl
    }

    pub fn artwork(&self) -> ArtworkRef {
        ArtworkRef::Url(self.url.clone())
    }
}
