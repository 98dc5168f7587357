//! Persistent artwork tier backed by `art-cache.json`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use lp_core::ArtCacheEntry;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::fs::atomic_write;

pub const DEFAULT_ART_CACHE_FILE: &str = "art-cache.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: BTreeMap<String, CacheRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    url: String,
    resolved_at: DateTime<Utc>,
}

pub struct DiskTier {
    path: PathBuf,
    ttl: Duration,
    entries: HashMap<String, ArtCacheEntry>,
}

impl DiskTier {
    /// Read the cache file, dropping expired entries.
    ///
    /// A missing file is an empty tier. A corrupt file is logged and treated as empty;
    /// it is overwritten on the next insert.
    pub async fn load(path: impl Into<PathBuf>, ttl: Duration, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let entries = match read_cache_file(&path).await {
            Ok(Some(file)) => file
                .entries
                .into_iter()
                .map(|(key, record)| {
                    let entry = ArtCacheEntry::new(key.clone(), record.url, record.resolved_at);
                    (key, entry)
                })
                .filter(|(_, entry)| !entry.is_expired(now, ttl))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Artwork cache unreadable; starting empty");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Artwork disk tier loaded");
        Self { path, ttl, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key`. Expired entries are dropped lazily and reported as misses.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<ArtCacheEntry> {
        let expired = self.entries.get(key)?.is_expired(now, self.ttl);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).cloned()
    }

    /// Record an entry and persist the whole mapping atomically.
    pub async fn insert(&mut self, entry: ArtCacheEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry);
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let file = CacheFile {
            entries: self
                .entries
                .values()
                .map(|entry| {
                    (
                        entry.key.clone(),
                        CacheRecord {
                            url: entry.url.clone(),
                            resolved_at: entry.resolved_at,
                        },
                    )
                })
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file).context("serialize artwork cache failed")?;
        atomic_write(&self.path, &content).await
    }
}

async fn read_cache_file(path: &Path) -> Result<Option<CacheFile>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("read artwork cache failed: {}", path.display()))
        }
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    let file = serde_json::from_str(&content)
        .with_context(|| format!("parse artwork cache failed: {}", path.display()))?;
    Ok(Some(file))
}
