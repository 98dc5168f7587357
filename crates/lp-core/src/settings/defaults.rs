use super::model::*;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            enable_on_launch: true,
            show_album_art: true,
            show_timestamps: true,
            display_format: DisplayFormat::SongArtist,
            idle_behavior: IdleBehavior::ClearStatus,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            refresh_artwork_on_resume: false,
        }
    }
}
