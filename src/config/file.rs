//! TOML configuration file loading
//!
//! Supports `~/.config/zupiter/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ZupiterConfigFile {
    /// Live service settings
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Haptic glove serial link
    #[serde(default)]
    pub serial: SerialFileConfig,

    /// Microphone and frame capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Entries kept in the on-screen log
    pub history_limit: Option<usize>,
}

/// Live service configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub outbound_queue: Option<usize>,
    pub instruction_file: Option<String>,
}

/// Serial link configuration
#[derive(Debug, Default, Deserialize)]
pub struct SerialFileConfig {
    pub enabled: Option<bool>,

    /// Port path; prompts when unset
    pub port: Option<String>,

    pub baud_rate: Option<u32>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub microphone: Option<bool>,

    /// JPEG file re-read on every frame tick
    pub frame_path: Option<String>,

    pub frame_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ZupiterConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ZupiterConfigFile {
    config_file_path().map_or_else(ZupiterConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> ZupiterConfigFile {
    if !path.exists() {
        return ZupiterConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ZupiterConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ZupiterConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/zupiter/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("zupiter").join("config.toml"))
}
