// Application Config - layered file/env configuration and the `config` facility
//
// Layers, lowest first: built-in defaults, the config file, `SLUICE__*`
// environment variables. Per-job and command-line settings are layered on
// top of `settings` when a job starts.

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::context::{Facility, JobHandle};
use crate::domain::{JobSettings, SettingsSection};
use crate::error::Result;

/// Environment used when none is configured
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// Prefix of environment overrides, e.g. `SLUICE__ENVIRONMENT=production`
pub const ENV_PREFIX: &str = "SLUICE";

/// Alias -> connection parameters
pub type RegistryTable = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunHistoryConfig {
    pub enabled: bool,
    /// SQLite file; the runner picks a per-user data path when absent
    pub path: Option<String>,
    /// Record test runs as well
    pub record_tests: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Selects the table read from per-job config files
    pub environment: String,
    pub db_registry: RegistryTable,
    pub ftp_registry: RegistryTable,
    pub email_registry: RegistryTable,
    pub push_notification_registry: RegistryTable,
    /// Default facility settings, one table per `<Name>Settings` section
    pub settings: BTreeMap<String, SettingsSection>,
    pub run_history: RunHistoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            db_registry: RegistryTable::new(),
            ftp_registry: RegistryTable::new(),
            email_registry: RegistryTable::new(),
            push_notification_registry: RegistryTable::new(),
            settings: BTreeMap::new(),
            run_history: RunHistoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional file plus the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().set_default("environment", DEFAULT_ENVIRONMENT)?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder.add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = Config::builder()
            .set_default("environment", DEFAULT_ENVIRONMENT)?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Registry table by its config key, e.g. `ftp_registry`
    pub fn registry(&self, key: &str) -> Option<&RegistryTable> {
        match key {
            "db_registry" => Some(&self.db_registry),
            "ftp_registry" => Some(&self.ftp_registry),
            "email_registry" => Some(&self.email_registry),
            "push_notification_registry" => Some(&self.push_notification_registry),
            _ => None,
        }
    }

    /// Default settings with section names mapped through `resolve`
    ///
    /// Config keys may come back lowercased, so `resolve` maps them onto the
    /// registered section names; unresolved names are kept as written.
    pub fn default_settings(&self, resolve: impl Fn(&str) -> Option<String>) -> JobSettings {
        let mut settings = JobSettings::new();
        for (name, section) in &self.settings {
            let section_name = resolve(name).unwrap_or_else(|| name.clone());
            for (key, value) in section {
                settings.set(&section_name, key, value.clone());
            }
        }
        settings
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

/// Exposes the loaded application config to every job
pub struct ConfigFacility {
    config: Rc<AppConfig>,
}

impl ConfigFacility {
    pub fn new(config: Rc<AppConfig>) -> Self {
        Self { config }
    }

    pub fn app_config(&self) -> Rc<AppConfig> {
        Rc::clone(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }
}

impl Facility for ConfigFacility {
    fn settings_section(&self) -> &'static str {
        "ConfigSettings"
    }

    fn enter_job(&mut self, job: &JobHandle, _settings: &SettingsSection) -> Result<()> {
        tracing::debug!(job = %job.name(), environment = %self.config.environment, "Config attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
environment = "staging"

[ftp_registry.partner]
host = "ftp.example.com"
username = "importer"

[settings.LoggerSettings]
level = "info"

[run_history]
enabled = true
"#;

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.environment, "staging");
        assert!(config.registry("ftp_registry").unwrap().contains_key("partner"));
        assert!(config.registry("db_registry").unwrap().is_empty());
        assert!(config.registry("nope").is_none());
        assert!(config.run_history.enabled);
        assert!(!config.run_history.record_tests);
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.environment, DEFAULT_ENVIRONMENT);
        assert!(config.settings.is_empty());
    }

    #[test]
    fn test_default_settings_resolves_section_names() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let settings = config.default_settings(|name| {
            name.eq_ignore_ascii_case("loggersettings")
                .then(|| "LoggerSettings".to_string())
        });
        let section = settings.section("LoggerSettings").unwrap();
        assert_eq!(section["level"], "info");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/sluice.toml"))).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
