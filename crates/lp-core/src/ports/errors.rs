use thiserror::Error;

/// Failure of the snapshot source. Always recovered as "nothing playing".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("media player not running")]
    NotRunning,

    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot source timed out")]
    Timeout,

    #[error("malformed snapshot: {0}")]
    Parse(String),
}

/// Failure of one external artwork lookup. Always recovered as the default asset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The search service refused the request for rate reasons (HTTP 429/403).
    #[error("artwork search rate limited")]
    RateLimited,

    #[error("artwork search timed out")]
    Timeout,

    #[error("artwork search transport error: {0}")]
    Transport(String),

    #[error("artwork search response malformed: {0}")]
    Decode(String),
}

impl LookupError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LookupError::RateLimited)
    }
}

/// Failure talking to the presence session task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("presence session is shut down")]
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppDirsError {
    #[error("system data-local directory is unavailable")]
    DataLocalDirUnavailable,
}
