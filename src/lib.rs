//! Listening Presence: mirrors the media player's current track into the
//! Discord "listening" activity.

pub mod bootstrap;
