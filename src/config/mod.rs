//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::SystemAudio;
use crate::live::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::live::{ConnectParams, GeminiConnector};
use crate::session::SessionConfig;
use paths::get_data_dir;

/// Environment variable that takes precedence over `apiKey` in the file.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// live_config.json shape (written by the host's settings panel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub native_language: Option<String>,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub start_muted: Option<bool>,
}

impl LiveConfig {
    /// Replace the file's API key with `env_key` when it is set and non-empty.
    pub fn with_api_key_override(mut self, env_key: Option<String>) -> Self {
        if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            params: ConnectParams {
                target_language: self
                    .target_language
                    .clone()
                    .unwrap_or(defaults.params.target_language),
                native_language: self
                    .native_language
                    .clone()
                    .unwrap_or(defaults.params.native_language),
            },
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            start_muted: self.start_muted.unwrap_or(false),
        }
    }

    pub fn connector(&self) -> Result<GeminiConnector> {
        let Some(api_key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            bail!("No API key configured (set {API_KEY_ENV} or apiKey in live_config.json)");
        };
        Ok(GeminiConnector::new(api_key)
            .with_endpoint(self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT))
            .with_model(self.model.as_deref().unwrap_or(DEFAULT_MODEL))
            .with_voice(self.voice_name.as_deref().unwrap_or(DEFAULT_VOICE)))
    }

    pub fn audio_backend(&self) -> SystemAudio {
        SystemAudio::new(self.input_device.clone(), self.output_device.clone())
    }
}

/// Read live_config.json from the data directory, then apply the environment.
pub fn read_live_config() -> LiveConfig {
    let path = get_config_path();
    read_json_file::<LiveConfig>(&path)
        .unwrap_or_default()
        .with_api_key_override(std::env::var(API_KEY_ENV).ok())
}

/// Path to live_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("live_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
