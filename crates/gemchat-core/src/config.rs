use crate::error::ConfigError;
use crate::persona::Persona;
use crate::state::{clamp_temperature, DEFAULT_TEMPERATURE};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_MOCK_DELAY_MS: u64 = 15;

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub history_path: Option<PathBuf>,
    pub mock: Option<bool>,
    pub mock_delay_ms: Option<u64>,
    pub default_persona: Option<String>,
    pub default_temperature: Option<f32>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;

        Ok(config_dir.join("gemchat").join("config.json"))
    }

    /// Raw value of `GOOGLE_API_KEY`, which may come from a `.env` file
    pub fn env_api_key() -> Option<String> {
        std::env::var(API_KEY_ENV).ok()
    }

    /// API key from the environment first, then the config file
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(Self::env_api_key())
    }

    pub fn api_key_with(&self, env_key: Option<String>) -> Option<String> {
        non_blank(env_key).or_else(|| non_blank(self.api_key.clone()))
    }

    /// Where the API key comes from: "env", "config", or None
    pub fn key_source(&self) -> Option<&'static str> {
        self.key_source_with(Self::env_api_key())
    }

    pub fn key_source_with(&self, env_key: Option<String>) -> Option<&'static str> {
        if non_blank(env_key).is_some() {
            Some("env")
        } else if non_blank(self.api_key.clone()).is_some() {
            Some("config")
        } else {
            None
        }
    }

    /// `--mock` on the command line or `"mock": true` in the file
    pub fn mock_mode(&self, mock_flag: bool) -> bool {
        mock_flag || self.mock.unwrap_or(false)
    }

    /// Key to start with. A missing key is fatal in live mode only; mock mode
    /// still picks up a key when there is one so live can be switched on later.
    pub fn startup_key(
        &self,
        mock_mode: bool,
        env_key: Option<String>,
    ) -> Result<Option<String>, ConfigError> {
        match self.api_key_with(env_key) {
            Some(key) => Ok(Some(key)),
            None if mock_mode => Ok(None),
            None => Err(missing_api_key()),
        }
    }

    pub fn require_api_key(&self) -> Result<String, ConfigError> {
        self.api_key().ok_or_else(missing_api_key)
    }

    pub fn persona(&self) -> Persona {
        self.default_persona
            .as_deref()
            .map(Persona::lookup)
            .unwrap_or_default()
    }

    pub fn temperature(&self) -> f32 {
        clamp_temperature(self.default_temperature.unwrap_or(DEFAULT_TEMPERATURE))
    }

    pub fn mock_delay_ms(&self) -> u64 {
        self.mock_delay_ms.unwrap_or(DEFAULT_MOCK_DELAY_MS)
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.filter(|k| !k.trim().is_empty())
}

fn missing_api_key() -> ConfigError {
    let path = Config::get_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "config.json".to_string());
    ConfigError::MissingApiKey(path)
}
