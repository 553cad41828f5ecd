//! Configuration management for Zupiter
//!
//! Settings resolve as environment > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::live::SessionProfile;
use crate::{Error, Result};

use self::file::ZupiterConfigFile;

/// Gemini Live WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio live model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Built-in haptic assistant instruction
pub const DEFAULT_INSTRUCTION: &str = include_str!("../../prompts/zupiter.txt");

/// Zupiter configuration
#[derive(Debug)]
pub struct Config {
    /// Live service settings
    pub live: LiveConfig,

    /// Haptic glove serial link
    pub serial: SerialConfig,

    /// Microphone and frame capture
    pub capture: CaptureConfig,

    /// Entries kept in the on-screen log
    pub history_limit: usize,
}

/// Live service configuration
#[derive(Debug)]
pub struct LiveConfig {
    /// Gemini API key
    pub api_key: Option<SecretString>,

    /// WebSocket endpoint
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Outbound media queue capacity
    pub outbound_queue: usize,

    /// System instruction sent at session setup
    pub system_instruction: String,
}

/// Serial link configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Drive the glove at all
    pub enabled: bool,

    /// Port path; prompts when unset
    pub port: Option<String>,

    /// Line rate
    pub baud_rate: u32,
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Stream the default microphone
    pub microphone: bool,

    /// JPEG file sent as the video feed
    pub frame_path: Option<PathBuf>,

    /// Time between frames
    pub frame_interval: Duration,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting cannot be parsed or the instruction file
    /// cannot be read
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting cannot be parsed or the instruction file
    /// cannot be read
    pub fn from_sources(
        fc: ZupiterConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.live.api_key)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let instruction_file = env("ZUPITER_INSTRUCTION_FILE").or(fc.live.instruction_file);
        let system_instruction = match instruction_file {
            Some(path) => load_instruction(&PathBuf::from(path))?,
            None => DEFAULT_INSTRUCTION.to_string(),
        };

        let live = LiveConfig {
            api_key,
            endpoint: env("ZUPITER_LIVE_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: env("ZUPITER_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("ZUPITER_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            outbound_queue: parse_env(&env, "ZUPITER_OUTBOUND_QUEUE")?
                .or(fc.live.outbound_queue)
                .unwrap_or(64)
                .max(1),
            system_instruction,
        };

        let serial = SerialConfig {
            enabled: env("ZUPITER_SERIAL_ENABLED")
                .map(|v| parse_bool("ZUPITER_SERIAL_ENABLED", &v))
                .transpose()?
                .or(fc.serial.enabled)
                .unwrap_or(true),
            port: env("ZUPITER_SERIAL_PORT").or(fc.serial.port),
            baud_rate: parse_env(&env, "ZUPITER_BAUD_RATE")?
                .or(fc.serial.baud_rate)
                .unwrap_or(9600),
        };

        let capture = CaptureConfig {
            microphone: env("ZUPITER_MICROPHONE")
                .map(|v| parse_bool("ZUPITER_MICROPHONE", &v))
                .transpose()?
                .or(fc.capture.microphone)
                .unwrap_or(true),
            frame_path: env("ZUPITER_FRAME_PATH")
                .or(fc.capture.frame_path)
                .map(PathBuf::from),
            frame_interval: Duration::from_millis(
                parse_env(&env, "ZUPITER_FRAME_INTERVAL_MS")?
                    .or(fc.capture.frame_interval_ms)
                    .unwrap_or(1500)
                    .max(100),
            ),
        };

        let history_limit = parse_env(&env, "ZUPITER_HISTORY_LIMIT")?
            .or(fc.history_limit)
            .unwrap_or(50)
            .max(1);

        Ok(Self {
            live,
            serial,
            capture,
            history_limit,
        })
    }

    /// API key for the live service
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no key was configured
    pub fn api_key(&self) -> Result<&SecretString> {
        self.live.api_key.as_ref().ok_or_else(missing_key)
    }

    /// Move the API key out of the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no key was configured
    pub fn take_api_key(&mut self) -> Result<SecretString> {
        self.live.api_key.take().ok_or_else(missing_key)
    }

    /// Model and voice for new sessions
    #[must_use]
    pub fn session_profile(&self) -> SessionProfile {
        SessionProfile {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
        }
    }
}

/// Read a system instruction from `path`
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read or is empty
pub fn load_instruction(path: &std::path::Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read instruction file {}: {e}", path.display()))
    })?;
    if text.trim().is_empty() {
        return Err(Error::Config(format!(
            "instruction file {} is empty",
            path.display()
        )));
    }
    Ok(text)
}

fn missing_key() -> Error {
    Error::Config("no API key: set GEMINI_API_KEY or live.api_key".to_string())
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    env(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid {key}: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(ZupiterConfigFile::default(), env_of(&[])).unwrap();

        assert!(config.live.api_key.is_none());
        assert!(matches!(config.api_key(), Err(Error::Config(_))));
        assert_eq!(config.live.model, DEFAULT_MODEL);
        assert_eq!(config.live.voice, "Zephyr");
        assert_eq!(config.live.outbound_queue, 64);
        assert!(config.live.system_instruction.contains("HAPTIC_5"));
        assert!(config.serial.enabled);
        assert_eq!(config.serial.baud_rate, 9600);
        assert!(config.serial.port.is_none());
        assert_eq!(config.capture.frame_interval, Duration::from_millis(1500));
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = ZupiterConfigFile::default();
        fc.live.voice = Some("Puck".to_string());
        fc.live.api_key = Some("from-file".to_string());
        fc.serial.baud_rate = Some(115_200);

        let config = Config::from_sources(
            fc,
            env_of(&[("GEMINI_API_KEY", "from-env"), ("ZUPITER_BAUD_RATE", "19200")]),
        )
        .unwrap();

        assert_eq!(config.api_key().unwrap().expose_secret(), "from-env");
        assert_eq!(config.live.voice, "Puck");
        assert_eq!(config.serial.baud_rate, 19200);
    }

    #[test]
    fn test_api_key_fallback() {
        let config =
            Config::from_sources(ZupiterConfigFile::default(), env_of(&[("API_KEY", "k")]))
                .unwrap();
        assert_eq!(config.api_key().unwrap().expose_secret(), "k");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_sources(
                ZupiterConfigFile::default(),
                env_of(&[("ZUPITER_BAUD_RATE", "fast")])
            ),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_sources(
                ZupiterConfigFile::default(),
                env_of(&[("ZUPITER_SERIAL_ENABLED", "maybe")])
            ),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bool_parsing() {
        let config = Config::from_sources(
            ZupiterConfigFile::default(),
            env_of(&[("ZUPITER_SERIAL_ENABLED", "0"), ("ZUPITER_MICROPHONE", "off")]),
        )
        .unwrap();
        assert!(!config.serial.enabled);
        assert!(!config.capture.microphone);
    }

    #[test]
    fn test_instruction_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Describe everything.").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::from_sources(
            ZupiterConfigFile::default(),
            env_of(&[("ZUPITER_INSTRUCTION_FILE", &path)]),
        )
        .unwrap();
        assert_eq!(config.live.system_instruction, "Describe everything.");

        let missing = Config::from_sources(
            ZupiterConfigFile::default(),
            env_of(&[("ZUPITER_INSTRUCTION_FILE", "/nonexistent/instruction.txt")]),
        );
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_session_profile() {
        let config = Config::from_sources(
            ZupiterConfigFile::default(),
            env_of(&[("ZUPITER_MODEL", "gemini-live-test")]),
        )
        .unwrap();
        let profile = config.session_profile();
        assert_eq!(profile.model, "gemini-live-test");
        assert_eq!(profile.voice, "Zephyr");
    }
}
