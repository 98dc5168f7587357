use std::path::PathBuf;

use lp_core::app_dirs::AppDirs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub settings_path: PathBuf,
    pub art_cache_path: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    pub fn from_app_dirs(dirs: &AppDirs) -> Self {
        Self {
            settings_path: dirs.app_data_root.join("settings.json"),
            art_cache_path: dirs.app_data_root.join("art-cache.json"),
            config_path: dirs.app_data_root.join("config.toml"),
            logs_dir: dirs.app_data_root.join("logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_paths_derives_concrete_locations_from_app_data_root() {
        let dirs = AppDirs {
            app_data_root: PathBuf::from("/tmp/listening-presence"),
        };

        let paths = AppPaths::from_app_dirs(&dirs);

        assert_eq!(paths.settings_path, PathBuf::from("/tmp/listening-presence/settings.json"));
        assert_eq!(paths.art_cache_path, PathBuf::from("/tmp/listening-presence/art-cache.json"));
        assert_eq!(paths.config_path, PathBuf::from("/tmp/listening-presence/config.toml"));
        assert_eq!(paths.logs_dir, PathBuf::from("/tmp/listening-presence/logs"));
    }
}
