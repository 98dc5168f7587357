//! Playback snapshot model.

use serde::{Deserialize, Serialize};

/// Observations whose positions differ by less than this are the same observation.
pub const POSITION_TOLERANCE_SECS: f64 = 1.0;

/// A single reading of the media player's state.
///
/// "Nothing playing" is modelled as `Option::<PlaybackSnapshot>::None` at every boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub is_playing: bool,
}

impl PlaybackSnapshot {
    /// Build a snapshot, clamping duration and position into range.
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        duration_secs: f64,
        position_secs: f64,
        is_playing: bool,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration_secs,
            position_secs,
            is_playing,
        }
        .clamped()
    }

    /// Return a copy with `0 <= position_secs <= duration_secs`.
    ///
    /// Noisy sources report negative, non-finite or past-the-end values; these are
    /// clamped rather than rejected.
    pub fn clamped(mut self) -> Self {
        self.duration_secs = finite_non_negative(self.duration_secs);
        self.position_secs = finite_non_negative(self.position_secs).min(self.duration_secs);
        self
    }

    /// Position at whole-second resolution.
    pub fn position_whole_secs(&self) -> u64 {
        self.position_secs.floor() as u64
    }

    /// True when both snapshots describe the same track.
    pub fn same_track(&self, other: &PlaybackSnapshot) -> bool {
        self.title == other.title && self.artist == other.artist && self.album == other.album
    }

    /// True when both snapshots would resolve to the same artwork.
    pub fn same_artwork_key(&self, other: &PlaybackSnapshot) -> bool {
        crate::artwork::cache_key(&self.artist, &self.album)
            == crate::artwork::cache_key(&other.artist, &other.album)
    }
}

fn finite_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Decide whether `next` is a change relative to the last emitted observation.
///
/// Compares track identity and play state exactly, and positions with a one second
/// tolerance so sub-second jitter never counts as a change.
pub fn observation_changed(
    previous: Option<&PlaybackSnapshot>,
    next: Option<&PlaybackSnapshot>,
) -> bool {
    match (previous, next) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(a), Some(b)) => {
            !a.same_track(b)
                || a.is_playing != b.is_playing
                || (a.position_secs - b.position_secs).abs() >= POSITION_TOLERANCE_SECS
        }
    }
}
