//! XDG Base Directory paths for hal9999.
//!
//! CLI tools should use XDG paths for cross-platform consistency,
//! not platform-native paths. This matches tools like gh, docker, kubectl.

use std::path::PathBuf;

/// Get the hal config directory.
///
/// Returns `$XDG_CONFIG_HOME/hal` if set, otherwise `~/.config/hal`.
/// This is where config files and the credential store live.
///
/// # Examples
///
/// ```
/// use hal_paths::config_dir;
///
/// let config = config_dir();
/// let creds = config.join("credentials.json");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("hal")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/hal")
    } else {
        PathBuf::from(".config/hal")
    }
}

/// Get the hal data directory.
///
/// `$HAL_DATA_DIR` wins when set (tests and multi-install setups point
/// it at a scratch root). Otherwise `$XDG_DATA_HOME/hal`, falling back
/// to `~/.local/share/hal`. This is where the database, per-task logs,
/// event streams and plan artifacts are stored.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HAL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("hal")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share/hal")
    } else {
        PathBuf::from(".local/share/hal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_hal() {
        let path = config_dir();
        assert!(path.ends_with("hal"), "config_dir should end with 'hal'");
    }

    #[test]
    fn test_data_dir_respects_override() {
        std::env::set_var("HAL_DATA_DIR", "/tmp/hal-test-data");
        let path = data_dir();
        assert_eq!(path, PathBuf::from("/tmp/hal-test-data"));
        std::env::remove_var("HAL_DATA_DIR");
    }
}
