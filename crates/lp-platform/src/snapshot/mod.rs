//! Media player snapshot sources.

pub mod command_source;

pub use command_source::{CommandSnapshotSource, MUSIC_APP_SCRIPT};
