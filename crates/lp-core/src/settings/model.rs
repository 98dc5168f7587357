use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Accepted range for the poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 2;
pub const MAX_POLL_INTERVAL_SECS: u64 = 15;

/// Which line carries the song title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayFormat {
    /// details = title, state = "by {artist}"
    #[default]
    SongArtist,
    /// details = artist, state = title
    ArtistSong,
}

/// What to show while the player is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdleBehavior {
    #[default]
    ClearStatus,
    ShowPaused,
}

/// User preferences, persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub schema_version: u32,
    pub enable_on_launch: bool,
    pub show_album_art: bool,
    pub show_timestamps: bool,
    pub display_format: DisplayFormat,
    pub idle_behavior: IdleBehavior,
    pub poll_interval_secs: u64,
    pub refresh_artwork_on_resume: bool,
}

impl Settings {
    /// Poll interval clamped into the accepted range.
    pub fn effective_poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS)
    }
}
