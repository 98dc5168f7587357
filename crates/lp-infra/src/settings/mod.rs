pub mod file_repo;

pub use file_repo::{FileSettingsRepository, DEFAULT_SETTINGS_FILE};
