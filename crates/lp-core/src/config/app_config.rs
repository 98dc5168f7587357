use std::path::PathBuf;

use crate::artwork::{DEFAULT_MEMORY_CAPACITY, DEFAULT_TTL_DAYS};

/// Application id registered with the presence service.
pub const DEFAULT_CLIENT_ID: &str = "1470809241907363921";

/// Number of presence endpoints probed per connection attempt.
pub const DEFAULT_ENDPOINT_COUNT: u8 = 10;

pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Longest accepted artwork cache lifetime.
pub const MAX_TTL_DAYS: i64 = 3650;

/// Application configuration DTO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `[presence] client_id`
    pub client_id: String,
    /// `[presence] endpoint_count`
    pub endpoint_count: u8,
    /// `[artwork] memory_capacity`
    pub artwork_memory_capacity: usize,
    /// `[artwork] ttl_days`
    pub artwork_ttl_days: i64,
    /// `[artwork] lookup_timeout_secs`
    pub lookup_timeout_secs: u64,
    /// `[source] command`, program followed by its arguments. Empty means the
    /// platform default source.
    pub source_command: Vec<String>,
    /// `[paths] data_dir`, overriding the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            endpoint_count: DEFAULT_ENDPOINT_COUNT,
            artwork_memory_capacity: DEFAULT_MEMORY_CAPACITY,
            artwork_ttl_days: DEFAULT_TTL_DAYS,
            lookup_timeout_secs: DEFAULT_LOOKUP_TIMEOUT_SECS,
            source_command: Vec::new(),
            data_dir: None,
        }
    }
}

impl AppConfig {
    /// Create AppConfig from a TOML value. Missing or mistyped keys keep their defaults.
    pub fn from_toml(toml_value: &toml::Value) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |section: &str, key: &str| toml_value.get(section).and_then(|s| s.get(key));

        let endpoint_count = match get("presence", "endpoint_count").and_then(|v| v.as_integer()) {
            Some(count) => u8::try_from(count)
                .map_err(|_| anyhow::anyhow!("presence.endpoint_count out of range: {count}"))?,
            None => defaults.endpoint_count,
        };
        let artwork_memory_capacity =
            match get("artwork", "memory_capacity").and_then(|v| v.as_integer()) {
                Some(capacity) => usize::try_from(capacity).map_err(|_| {
                    anyhow::anyhow!("artwork.memory_capacity out of range: {capacity}")
                })?,
                None => defaults.artwork_memory_capacity,
            };
        let artwork_ttl_days = match get("artwork", "ttl_days").and_then(|v| v.as_integer()) {
            Some(days) if (1..=MAX_TTL_DAYS).contains(&days) => days,
            Some(days) => {
                anyhow::bail!("artwork.ttl_days out of range (1..={MAX_TTL_DAYS}): {days}")
            }
            None => defaults.artwork_ttl_days,
        };

        Ok(Self {
            client_id: get("presence", "client_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(defaults.client_id),
            endpoint_count,
            artwork_memory_capacity,
            artwork_ttl_days,
            lookup_timeout_secs: get("artwork", "lookup_timeout_secs")
                .and_then(|v| v.as_integer())
                .map(|secs| secs.max(1) as u64)
                .unwrap_or(defaults.lookup_timeout_secs),
            source_command: get("source", "command")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or(defaults.source_command),
            data_dir: get("paths", "data_dir")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        })
    }
}
