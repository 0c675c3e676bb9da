//! Canonical file paths for lumo data files.
//!
//! Both files live under the XDG base directories:
//!   - config.toml  Written by the settings GUI, read by the daemon.
//!   - status.toml  Written by the daemon, read by the GUI.

use std::path::PathBuf;

const APP_DIR_NAME: &str = "lumo";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the full path to the config file: `~/.config/lumo/config.toml`
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: `$XDG_STATE_HOME/lumo/status.toml`
pub fn status_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR_NAME)
        .join(STATUS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_path_has_correct_name() {
        let path = config_file_path();
        assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
    }

    #[test]
    fn config_file_path_is_inside_app_dir() {
        let path = config_file_path();
        assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_DIR_NAME);
    }

    #[test]
    fn status_file_path_has_correct_name() {
        let path = status_file_path();
        assert_eq!(path.file_name().unwrap(), STATUS_FILE_NAME);
    }

    #[test]
    fn status_file_path_is_inside_app_dir() {
        let path = status_file_path();
        assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_DIR_NAME);
    }
}
