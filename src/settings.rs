//! Persisted settings plus environment overrides.
//!
//! Settings live in the platform config directory (`directories::ProjectDirs`)
//! as `settings.json`. Environment variables, optionally loaded from a `.env`
//! file, take precedence over the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::agent::AgentConfig;
use crate::compress::CompressionPolicy;
use crate::config::Language;
use crate::geometry::{JitterPolicy, NominalFrame, ProfileConfig, MAX_FRACTION_LIMIT};
use crate::model::ModelConfig;

/// Settings errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model API base URL
    pub base_url: String,
    /// Model API key
    pub api_key: String,
    /// Model name
    pub model_name: String,
    /// ADB device ID (empty for the only attached device)
    pub device_id: String,
    /// Language code ("cn" or "en")
    pub lang: String,
    pub max_retries: u32,
    /// Delay before the first model retry, in seconds
    pub retry_delay: u64,
    /// Per-request model timeout, in seconds
    pub timeout_secs: u64,
    /// Ask for the provider's native reasoning trace
    pub thinking: bool,
    pub max_turns: u32,
    pub max_clarifications: u32,
    pub nominal_width: u32,
    pub nominal_height: u32,
    pub jitter_fraction: f64,
    /// Fixed jitter seed for reproducible runs
    pub jitter_seed: Option<u64>,
    pub screenshot_max_dim: u32,
    pub screenshot_quality: u8,
    pub screenshot_grayscale: bool,
    /// Pad screenshots to the nominal frame's shape
    pub screenshot_letterbox: bool,
    /// Status bar height override in pixels
    pub status_bar_px: Option<u32>,
    /// Navigation bar height override in pixels
    pub nav_bar_px: Option<u32>,
    /// Pause after each action, in milliseconds
    pub settle_delay_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let model = ModelConfig::default();
        let agent = AgentConfig::default();
        Self {
            base_url: model.base_url,
            api_key: model.api_key,
            model_name: model.model_name,
            device_id: String::new(),
            lang: agent.lang.code().to_string(),
            max_retries: model.max_retries,
            retry_delay: model.retry_delay.as_secs(),
            timeout_secs: model.timeout.as_secs(),
            thinking: false,
            max_turns: agent.max_turns,
            max_clarifications: agent.max_clarifications,
            nominal_width: agent.nominal_frame.width,
            nominal_height: agent.nominal_frame.height,
            jitter_fraction: agent.jitter.max_fraction,
            jitter_seed: None,
            screenshot_max_dim: agent.compression.max_dimension,
            screenshot_quality: agent.compression.quality,
            screenshot_grayscale: false,
            screenshot_letterbox: false,
            status_bar_px: None,
            nav_bar_px: None,
            settle_delay_ms: agent.settle_delay.as_millis() as u64,
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "phone-pilot")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, or defaults if there is none.
    pub fn load() -> Result<Self, SettingsError> {
        match Self::settings_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)?;
                let settings: Self = serde_json::from_str(&content)?;
                settings.validate()?;
                Ok(settings)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let dir = Self::config_dir().ok_or(SettingsError::NoConfigDir)?;
        fs::create_dir_all(&dir)?;

        let path = dir.join("settings.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, SettingsError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MODEL_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("MODEL_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = get("MODEL_NAME") {
            self.model_name = v;
        }
        if let Some(v) = get("ADB_DEVICE_ID") {
            self.device_id = v;
        }
        if let Some(v) = get("AGENT_LANG") {
            self.lang = v;
        }
        parse_into(&get, "MODEL_MAX_RETRIES", &mut self.max_retries)?;
        parse_into(&get, "MODEL_TIMEOUT_SECS", &mut self.timeout_secs)?;
        parse_into(&get, "MAX_TURNS", &mut self.max_turns)?;
        parse_into(&get, "NOMINAL_WIDTH", &mut self.nominal_width)?;
        parse_into(&get, "NOMINAL_HEIGHT", &mut self.nominal_height)?;
        parse_into(&get, "JITTER_FRACTION", &mut self.jitter_fraction)?;
        parse_into(&get, "SCREENSHOT_MAX_DIM", &mut self.screenshot_max_dim)?;
        parse_into(&get, "SCREENSHOT_QUALITY", &mut self.screenshot_quality)?;
        parse_bool_into(&get, "SCREENSHOT_GRAYSCALE", &mut self.screenshot_grayscale)?;
        parse_bool_into(&get, "SCREENSHOT_LETTERBOX", &mut self.screenshot_letterbox)?;

        let mut seed = 0u64;
        if parse_into(&get, "JITTER_SEED", &mut seed)? {
            self.jitter_seed = Some(seed);
        }
        let mut px = 0u32;
        if parse_into(&get, "STATUS_BAR_PX", &mut px)? {
            self.status_bar_px = Some(px);
        }
        if parse_into(&get, "NAV_BAR_PX", &mut px)? {
            self.nav_bar_px = Some(px);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values that parse but cannot drive a session.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |key: &str, value: String| SettingsError::InvalidEnv {
            key: key.to_string(),
            value,
        };
        if self.nominal_width == 0 {
            return Err(invalid("NOMINAL_WIDTH", self.nominal_width.to_string()));
        }
        if self.nominal_height == 0 {
            return Err(invalid("NOMINAL_HEIGHT", self.nominal_height.to_string()));
        }
        if !(0.0..=MAX_FRACTION_LIMIT).contains(&self.jitter_fraction) {
            return Err(invalid("JITTER_FRACTION", self.jitter_fraction.to_string()));
        }
        Ok(())
    }

    pub fn language(&self) -> Language {
        Language::from_code(&self.lang)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_secs(self.retry_delay))
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .with_thinking(self.thinking)
    }

    pub fn agent_config(&self) -> AgentConfig {
        let mut jitter = JitterPolicy::default().with_max_fraction(self.jitter_fraction);
        if let Some(seed) = self.jitter_seed {
            jitter = jitter.with_seed(seed);
        }
        let compression = CompressionPolicy::default()
            .with_max_dimension(self.screenshot_max_dim)
            .with_quality(self.screenshot_quality)
            .with_grayscale(self.screenshot_grayscale);
        let profile = ProfileConfig {
            status_bar_px: self.status_bar_px,
            nav_bar_px: self.nav_bar_px,
        };

        let mut config = AgentConfig::default()
            .with_lang(self.language())
            .with_max_turns(self.max_turns)
            .with_max_clarifications(self.max_clarifications)
            .with_nominal_frame(NominalFrame::new(self.nominal_width, self.nominal_height))
            .with_jitter(jitter)
            .with_compression(compression)
            .with_letterbox(self.screenshot_letterbox)
            .with_profile(profile)
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms));
        if !self.device_id.is_empty() {
            config = config.with_device_id(&self.device_id);
        }
        config
    }
}

/// Parse `key` into `target` if set. Returns whether a value was applied.
fn parse_into<T, G>(get: &G, key: &str, target: &mut T) -> Result<bool, SettingsError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(false);
    };
    *target = raw.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        key: key.to_string(),
        value: raw.clone(),
    })?;
    Ok(true)
}

fn parse_bool_into<G>(get: &G, key: &str, target: &mut bool) -> Result<bool, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(false);
    };
    *target = match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            return Err(SettingsError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            })
        }
    };
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_configs() {
        let settings = AppSettings::default();
        assert_eq!(settings.model_name, "autoglm-phone-9b");
        assert_eq!(settings.lang, "cn");
        assert_eq!(settings.nominal_width, 1000);
        assert_eq!(settings.agent_config().max_turns, 100);
    }

    #[test]
    fn test_env_overrides() {
        let settings = AppSettings::default()
            .with_overrides(env(&[
                ("MODEL_BASE_URL", "https://example.invalid/v1"),
                ("AGENT_LANG", "en"),
                ("MAX_TURNS", "12"),
                ("JITTER_SEED", "7"),
                ("SCREENSHOT_LETTERBOX", "yes"),
                ("NAV_BAR_PX", "90"),
                ("ADB_DEVICE_ID", ""),
            ]))
            .unwrap();

        assert_eq!(settings.base_url, "https://example.invalid/v1");
        assert_eq!(settings.language(), Language::English);
        assert_eq!(settings.jitter_seed, Some(7));
        assert_eq!(settings.nav_bar_px, Some(90));
        assert_eq!(settings.status_bar_px, None);

        let agent = settings.agent_config();
        assert_eq!(agent.max_turns, 12);
        assert_eq!(agent.jitter.seed, Some(7));
        assert_eq!(agent.compression.letterbox, Some(NominalFrame::new(1000, 1000)));
        assert_eq!(agent.device_id, None);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = AppSettings::default()
            .with_overrides(env(&[("MAX_TURNS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidEnv { ref key, .. } if key == "MAX_TURNS"));
    }

    #[test]
    fn test_unusable_values_are_rejected() {
        for (key, value) in [
            ("JITTER_FRACTION", "inf"),
            ("JITTER_FRACTION", "NaN"),
            ("JITTER_FRACTION", "0.9"),
            ("JITTER_FRACTION", "-0.1"),
            ("NOMINAL_WIDTH", "0"),
            ("NOMINAL_HEIGHT", "0"),
        ] {
            let err = AppSettings::default()
                .with_overrides(env(&[(key, value)]))
                .unwrap_err();
            assert!(
                matches!(err, SettingsError::InvalidEnv { key: ref k, .. } if k == key),
                "{}={} gave {:?}",
                key,
                value,
                err
            );
        }
    }

    #[test]
    fn test_settings_file_values_are_validated() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"jitter_fraction": 1e308, "nominal_height": 0}"#).unwrap();
        assert!(settings.validate().is_err());
        assert!(AppSettings::default().validate().is_ok());
    }

    #[test]
    fn test_old_files_fill_missing_fields() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"base_url": "http://10.0.0.2:8000/v1"}"#).unwrap();
        assert_eq!(settings.base_url, "http://10.0.0.2:8000/v1");
        assert_eq!(settings.max_clarifications, 2);
    }

    #[test]
    fn test_model_config_from_settings() {
        let settings = AppSettings {
            timeout_secs: 30,
            thinking: true,
            ..AppSettings::default()
        };
        let model = settings.model_config();
        assert_eq!(model.timeout, Duration::from_secs(30));
        assert!(model.thinking);
    }
}
