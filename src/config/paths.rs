//! Platform data directory.
//!
//!   Windows: %APPDATA%/live-voice-core
//!   macOS:   ~/Library/Application Support/live-voice-core
//!   Linux:   $XDG_CONFIG_HOME/live-voice-core (default ~/.config)
//!
//! `LIVE_VOICE_DATA_DIR` overrides all of the above.

use std::path::PathBuf;

const APP_DIR: &str = "live-voice-core";

/// Directory holding the config file and logs.
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("LIVE_VOICE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    get_config_base().join(APP_DIR)
}

/// Rolling log files live here.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_under_data_dir() {
        assert!(get_log_dir().starts_with(get_data_dir()));
        assert!(get_log_dir().ends_with("logs"));
    }
}
