//! Snapshot source backed by an external command.
//!
//! The command prints one line: `title||artist||album||duration||position||playing`.
//! A first field of `stopped` means nothing is playing and `notrunning` means the
//! player itself is not running.

use std::process::Stdio;

use async_trait::async_trait;
use lp_core::ports::{SnapshotSourcePort, SourceError};
use lp_core::PlaybackSnapshot;
use tokio::process::Command;
use tracing::trace;

const FIELD_SEPARATOR: &str = "||";
const FIELD_COUNT: usize = 6;
const STOPPED_SENTINEL: &str = "stopped";
const NOT_RUNNING_SENTINEL: &str = "notrunning";

/// Music.app query used on macOS when no command is configured.
pub const MUSIC_APP_SCRIPT: &str = r#"
if application "Music" is not running then
    return "notrunning||||||||||"
end if
tell application "Music"
    set playerState to player state as string
    if playerState is "stopped" then
        return "stopped||||||||||"
    end if
    set trackName to name of current track
    set trackArtist to artist of current track
    set trackAlbum to album of current track
    set trackDuration to duration of current track
    set trackPosition to player position
    set isPlaying to (playerState is "playing")
    return trackName & "||" & trackArtist & "||" & trackAlbum & "||" & trackDuration & "||" & trackPosition & "||" & isPlaying
end tell
"#;

pub struct CommandSnapshotSource {
    program: String,
    args: Vec<String>,
}

impl CommandSnapshotSource {
    /// `command` is the program followed by its arguments.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// The Music.app query via `osascript`.
    pub fn music_app() -> Self {
        Self {
            program: "osascript".to_string(),
            args: vec!["-e".to_string(), MUSIC_APP_SCRIPT.to_string()],
        }
    }

    /// The configured command, or the platform default. `None` when the platform has none.
    pub fn from_config(command: &[String]) -> Option<Self> {
        if !command.is_empty() {
            return Self::new(command);
        }
        if cfg!(target_os = "macos") {
            Some(Self::music_app())
        } else {
            None
        }
    }
}

#[async_trait]
impl SnapshotSourcePort for CommandSnapshotSource {
    async fn current_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SourceError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SourceError::Unavailable(format!("spawn {} failed: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!(program = %self.program, output = %stdout.trim(), "Snapshot command finished");
        parse_snapshot_line(&stdout)
    }
}

/// Parse one line of source output.
///
/// The numeric fields are read from the right, so a separator inside the text
/// fields cannot shift them. Extra separators are kept in the title.
pub fn parse_snapshot_line(line: &str) -> Result<Option<PlaybackSnapshot>, SourceError> {
    let line = line.trim();

    match line.split(FIELD_SEPARATOR).next().map(str::trim) {
        Some(STOPPED_SENTINEL) => return Ok(None),
        Some(NOT_RUNNING_SENTINEL) => return Err(SourceError::NotRunning),
        _ => {}
    }

    let field_count_error = || {
        SourceError::Parse(format!(
            "expected {FIELD_COUNT} fields, got {}: {line}",
            line.split(FIELD_SEPARATOR).count()
        ))
    };
    let [is_playing, position, duration, text]: [&str; 4] = line
        .rsplitn(4, FIELD_SEPARATOR)
        .collect::<Vec<_>>()
        .try_into()
        .map_err(|_| field_count_error())?;
    let Some((rest, album)) = text.rsplit_once(FIELD_SEPARATOR) else {
        return Err(field_count_error());
    };
    let Some((title, artist)) = rest.rsplit_once(FIELD_SEPARATOR) else {
        return Err(field_count_error());
    };

    let duration = parse_seconds(duration, "duration")?;
    let position = parse_seconds(position, "position")?;
    let is_playing = is_playing.trim().eq_ignore_ascii_case("true");

    Ok(Some(PlaybackSnapshot::new(
        title, artist, album, duration, position, is_playing,
    )))
}

// Some locales print a decimal comma.
fn parse_seconds(raw: &str, field: &str) -> Result<f64, SourceError> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|e| SourceError::Parse(format!("invalid {field} {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_playing_track() {
        let snapshot = parse_snapshot_line("A||B||C||200.5||10.25||true\n")
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.title, "A");
        assert_eq!(snapshot.artist, "B");
        assert_eq!(snapshot.album, "C");
        assert_eq!(snapshot.duration_secs, 200.5);
        assert_eq!(snapshot.position_secs, 10.25);
        assert!(snapshot.is_playing);
    }

    #[test]
    fn decimal_comma_and_out_of_range_position() {
        let snapshot = parse_snapshot_line("A||B||C||200,0||250,0||false")
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.position_secs, 200.0);
        assert!(!snapshot.is_playing);
    }

    #[test]
    fn sentinels() {
        assert_eq!(parse_snapshot_line("stopped||||||||||").unwrap(), None);
        assert_eq!(parse_snapshot_line("stopped").unwrap(), None);
        assert_eq!(
            parse_snapshot_line("notrunning||||||||||"),
            Err(SourceError::NotRunning)
        );
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        assert!(matches!(parse_snapshot_line("A||B||C"), Err(SourceError::Parse(_))));
        assert!(matches!(
            parse_snapshot_line("A||B||C||long||10||true"),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(parse_snapshot_line(""), Err(SourceError::Parse(_))));
    }

    #[test]
    fn separator_in_a_title_keeps_the_numeric_fields() {
        let snapshot = parse_snapshot_line("Left||Right||B||C||200||10||true")
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.title, "Left||Right");
        assert_eq!(snapshot.artist, "B");
        assert_eq!(snapshot.album, "C");
        assert_eq!(snapshot.duration_secs, 200.0);
        assert_eq!(snapshot.position_secs, 10.0);
        assert!(snapshot.is_playing);
    }

    #[test]
    fn empty_command_has_no_source() {
        assert!(CommandSnapshotSource::new(&[]).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_the_configured_command() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'A||B||C||200||10||true'".to_string(),
        ];
        let source = CommandSnapshotSource::new(&command).unwrap();
        let snapshot = source.current_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.title, "A");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_unavailable() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let source = CommandSnapshotSource::new(&command).unwrap();
        assert!(matches!(
            source.current_snapshot().await,
            Err(SourceError::Unavailable(_))
        ));

        let missing = CommandSnapshotSource::new(&["/nonexistent/lp-source".to_string()]).unwrap();
        assert!(matches!(
            missing.current_snapshot().await,
            Err(SourceError::Unavailable(_))
        ));
    }
}
