use crate::playback::PlaybackSnapshot;

use super::PublishMode;

/// Width of the position window used for duplicate suppression.
pub const POSITION_BUCKET_SECS: f64 = 5.0;

/// Largest anchor drift still treated as the same activity.
const ANCHOR_TOLERANCE_SECS: f64 = POSITION_BUCKET_SECS / 2.0;

/// Identity of a publishable activity.
///
/// Two snapshots with matching fingerprints produce the same visible presence, so the
/// second one is never sent. For a playing track the anchor is the implied start
/// instant (`now - position`), which stays put while the track plays normally and
/// moves on a seek. A paused track has no moving clock, so its position is the anchor.
///
/// Anchors are compared against the one stored at publish time with a tolerance, not
/// bucketed, so whole-second wall clock jitter never crosses a boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub mode: PublishMode,
    pub anchor_secs: f64,
}

impl Fingerprint {
    pub fn of(snapshot: &PlaybackSnapshot, mode: PublishMode, now_secs: i64) -> Self {
        let anchor_secs = match mode {
            PublishMode::Playing => now_secs as f64 - snapshot.position_secs,
            PublishMode::Paused => snapshot.position_secs,
        };
        Self {
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            album: snapshot.album.clone(),
            mode,
            anchor_secs,
        }
    }

    /// Same track, same mode, anchor within half a window of `other`.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.mode == other.mode
            && (self.anchor_secs - other.anchor_secs).abs() <= ANCHOR_TOLERANCE_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn playing(position: f64) -> PlaybackSnapshot {
        PlaybackSnapshot::new("A", "B", "C", 200.0, position, true)
    }

    #[test]
    fn normal_progression_keeps_the_fingerprint() {
        let first = Fingerprint::of(&playing(10.0), PublishMode::Playing, NOW);
        let later = Fingerprint::of(&playing(15.0), PublishMode::Playing, NOW + 5);
        assert!(first.matches(&later));
    }

    #[test]
    fn sub_second_jitter_at_a_window_edge_matches() {
        // Implied starts 992.4 and 992.6 straddle the 992.5 rounding edge.
        let first = Fingerprint::of(&playing(7.6), PublishMode::Playing, 1000);
        let later = Fingerprint::of(&playing(12.4), PublishMode::Playing, 1005);
        assert!(first.matches(&later));
        assert!(later.matches(&first));
    }

    #[test]
    fn seeking_changes_the_fingerprint() {
        let first = Fingerprint::of(&playing(10.0), PublishMode::Playing, NOW);
        let seeked = Fingerprint::of(&playing(90.0), PublishMode::Playing, NOW + 5);
        assert!(!first.matches(&seeked));

        let nudged = Fingerprint::of(&playing(19.0), PublishMode::Playing, NOW + 5);
        assert!(!first.matches(&nudged));
    }

    #[test]
    fn paused_fingerprint_ignores_wall_clock() {
        let first = Fingerprint::of(&playing(42.0), PublishMode::Paused, NOW);
        let later = Fingerprint::of(&playing(42.0), PublishMode::Paused, NOW + 600);
        assert!(first.matches(&later));
    }

    #[test]
    fn mode_is_part_of_the_identity() {
        let playing_fp = Fingerprint::of(&playing(0.0), PublishMode::Playing, 0);
        let paused_fp = Fingerprint::of(&playing(0.0), PublishMode::Paused, 0);
        assert!(!playing_fp.matches(&paused_fp));
    }
}
