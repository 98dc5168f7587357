use serde::{Deserialize, Serialize};

use crate::artwork::ArtworkRef;
use crate::playback::PlaybackSnapshot;
use crate::settings::model::{DisplayFormat, Settings};

use super::PublishMode;

/// Asset key of the image bundled with the presence application.
pub const DEFAULT_ASSET_KEY: &str = "apple_music_logo";

/// Label shown next to the small image.
pub const DEFAULT_PLAYER_LABEL: &str = "Apple Music";

/// Presentation options applied when an activity is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOptions {
    pub display_format: DisplayFormat,
    pub show_timestamps: bool,
    pub default_asset_key: String,
    pub player_label: String,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            display_format: DisplayFormat::default(),
            show_timestamps: true,
            default_asset_key: DEFAULT_ASSET_KEY.to_string(),
            player_label: DEFAULT_PLAYER_LABEL.to_string(),
        }
    }
}

impl ActivityOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            display_format: settings.display_format,
            show_timestamps: settings.show_timestamps,
            ..Self::default()
        }
    }
}

/// Start/end instants in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTimestamps {
    pub start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Protocol-independent description of a "listening" activity.
///
/// Strings are not truncated here; the wire encoder owns that limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityPayload {
    pub details: String,
    pub state: String,
    pub timestamps: Option<ActivityTimestamps>,
    /// Artwork URL or the default asset key.
    pub large_image: String,
    pub large_text: Option<String>,
    pub small_image: Option<String>,
    pub small_text: Option<String>,
}

impl ActivityPayload {
    pub fn build(
        snapshot: &PlaybackSnapshot,
        artwork: &ArtworkRef,
        mode: PublishMode,
        options: &ActivityOptions,
        now_secs: i64,
    ) -> Self {
        let (details, state) = match options.display_format {
            DisplayFormat::SongArtist => {
                (snapshot.title.clone(), format!("by {}", snapshot.artist))
            }
            DisplayFormat::ArtistSong => (snapshot.artist.clone(), snapshot.title.clone()),
        };

        let timestamps = match mode {
            PublishMode::Playing if options.show_timestamps => {
                let start = now_secs - snapshot.position_secs as i64;
                let end = (snapshot.duration_secs > 0.0)
                    .then(|| start + snapshot.duration_secs as i64);
                Some(ActivityTimestamps { start, end })
            }
            _ => None,
        };

        let large_image = artwork
            .url()
            .map(str::to_string)
            .unwrap_or_else(|| options.default_asset_key.clone());
        let large_text = (!snapshot.album.trim().is_empty()).then(|| snapshot.album.clone());

        let small_text = match mode {
            PublishMode::Playing => options.player_label.clone(),
            PublishMode::Paused => "Paused".to_string(),
        };

        Self {
            details,
            state,
            timestamps,
            large_image,
            large_text,
            small_image: Some(options.default_asset_key.clone()),
            small_text: Some(small_text),
        }
    }
}
