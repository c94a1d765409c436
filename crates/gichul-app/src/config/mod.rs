//! Environment-backed configuration.

use std::collections::HashSet;

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::services::docparse::{MakeMode, MineruConfig};

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service settings; every field maps to one environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Comma-separated API keys; unset disables authentication.
    #[serde(default)]
    pub api_keys: Option<String>,
    pub rate_limit_per_minute: u32,
    pub max_concurrent_parses: usize,
    pub max_queue_depth: usize,
    pub max_file_size_mb: u64,
    #[serde(default)]
    pub cors_origins: Option<String>,
    pub listen_addr: String,
    pub mineru_language: String,
    pub mineru_parse_method: String,
    pub mineru_formula_enable: bool,
    pub mineru_table_enable: bool,
    pub mineru_make_mode: String,
}

impl Settings {
    pub fn mineru_config(&self) -> MineruConfig {
        MineruConfig::builder()
            .language(self.mineru_language.clone())
            .parse_method(self.mineru_parse_method.clone())
            .formula_enable(self.mineru_formula_enable)
            .table_enable(self.mineru_table_enable)
            .make_mode(MakeMode::parse(&self.mineru_make_mode))
            .build()
    }

    /// Valid API keys; empty set means authentication is disabled.
    pub fn api_key_set(&self) -> HashSet<String> {
        self.api_keys
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Defaults mirror the unset-environment values in [`load`].
impl Default for Settings {
    fn default() -> Self {
        Settings {
            google_api_key: None,
            openai_api_key: None,
            api_keys: None,
            rate_limit_per_minute: 60,
            max_concurrent_parses: 4,
            max_queue_depth: 32,
            max_file_size_mb: 50,
            cors_origins: None,
            listen_addr: "127.0.0.1:8080".to_string(),
            mineru_language: "korean".to_string(),
            mineru_parse_method: "auto".to_string(),
            mineru_formula_enable: true,
            mineru_table_enable: true,
            mineru_make_mode: "mm_markdown".to_string(),
        }
    }
}

pub fn load() -> Result<Settings, AppConfigError> {
    let cfg = Config::builder()
        .set_default("rate_limit_per_minute", 60)?
        .set_default("max_concurrent_parses", 4)?
        .set_default("max_queue_depth", 32)?
        .set_default("max_file_size_mb", 50)?
        .set_default("listen_addr", "127.0.0.1:8080")?
        .set_default("mineru_language", "korean")?
        .set_default("mineru_parse_method", "auto")?
        .set_default("mineru_formula_enable", true)?
        .set_default("mineru_table_enable", true)?
        .set_default("mineru_make_mode", "mm_markdown")?
        .add_source(Environment::default().try_parsing(true))
        .build()?;

    let settings: Settings = cfg.try_deserialize()?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), AppConfigError> {
    if settings.max_concurrent_parses == 0 {
        return Err(AppConfigError::Invalid(
            "MAX_CONCURRENT_PARSES must be at least 1".to_string(),
        ));
    }
    if settings.max_queue_depth == 0 {
        return Err(AppConfigError::Invalid(
            "MAX_QUEUE_DEPTH must be at least 1".to_string(),
        ));
    }
    if settings.max_file_size_mb == 0 {
        return Err(AppConfigError::Invalid(
            "MAX_FILE_SIZE_MB must be at least 1".to_string(),
        ));
    }
    if settings.rate_limit_per_minute == 0 {
        return Err(AppConfigError::Invalid(
            "RATE_LIMIT_PER_MINUTE must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_parse_as_trimmed_set() {
        let mut settings = Settings::default();
        settings.api_keys = Some(" key-a, key-b ,, ".to_string());
        let keys = settings.api_key_set();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("key-a"));
        assert!(keys.contains("key-b"));

        settings.api_keys = None;
        assert!(settings.api_key_set().is_empty());
    }

    #[test]
    fn cors_origins_split_on_commas() {
        let mut settings = Settings::default();
        settings.cors_origins = Some("https://a.example, https://b.example".to_string());
        assert_eq!(
            settings.cors_origin_list(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn file_size_converts_to_bytes() {
        let settings = Settings::default();
        assert_eq!(settings.max_file_size_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut settings = Settings::default();
        settings.max_concurrent_parses = 0;
        assert!(validate(&settings).is_err());
    }
}
