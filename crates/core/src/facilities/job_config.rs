// Job Config Facility - per-importer configuration file
//
// The file holds a `default` table plus one table per environment. The table
// of the configured environment is merged over `default`.

use std::cell::OnceCell;
use std::path::PathBuf;

use ::config::{Config, File};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::context::{Facility, JobHandle};
use crate::domain::{parse_section, SettingsSection};
use crate::error::{AppError, Result};
use crate::facilities::app_config::{ConfigFacility, DEFAULT_ENVIRONMENT};

type Table = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfigSettings {
    /// TOML, YAML or JSON file, by extension
    pub file: Option<PathBuf>,
}

#[derive(Default)]
pub struct JobConfig {
    file: Option<PathBuf>,
    environment: String,
    loaded: OnceCell<Table>,
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged table for the job's environment, loaded on first use
    pub fn table(&self) -> Result<&Table> {
        if let Some(table) = self.loaded.get() {
            return Ok(table);
        }
        let table = match &self.file {
            Some(path) => load_environment(path, &self.environment)?,
            None => Table::new(),
        };
        Ok(self.loaded.get_or_init(|| table))
    }

    /// Value at a dotted key, e.g. `sftp.directory`
    pub fn get(&self, key: &str) -> Result<serde_json::Value> {
        let mut parts = key.split('.');
        let first = parts.next().unwrap_or_default();
        let mut current = self.table()?.get(first);
        for part in parts {
            current = current.and_then(|value| value.get(part));
        }
        current
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job config has no key '{}'", key)))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        serde_json::from_value(self.get(key)?)
            .map_err(|e| AppError::Config(format!("job config key '{}': {}", key, e)))
    }
}

fn load_environment(path: &PathBuf, environment: &str) -> Result<Table> {
    let config = Config::builder()
        .add_source(File::from(path.as_path()).required(true))
        .build()?;
    let mut file: Table = config.try_deserialize()?;

    let mut merged = match file.remove("default") {
        Some(serde_json::Value::Object(table)) => table,
        Some(_) => {
            return Err(AppError::Config(format!(
                "{}: 'default' must be a table",
                path.display()
            )))
        }
        None => Table::new(),
    };
    match file.remove(environment) {
        Some(serde_json::Value::Object(overrides)) => merge(&mut merged, overrides),
        Some(_) => {
            return Err(AppError::Config(format!(
                "{}: '{}' must be a table",
                path.display(),
                environment
            )))
        }
        None => {}
    }
    Ok(merged)
}

/// Deep merge, `overrides` wins
fn merge(base: &mut Table, overrides: Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(nested)) => {
                merge(existing, nested)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

impl Facility for JobConfig {
    fn settings_section(&self) -> &'static str {
        "JobConfigSettings"
    }

    fn enter_job(&mut self, job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        let settings: JobConfigSettings = parse_section(self.settings_section(), settings)?;
        self.file = settings.file;
        self.environment = job
            .facility_ref::<ConfigFacility>()
            .map(|config| config.environment().to_string())
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        self.loaded = OnceCell::new();
        Ok(())
    }
}
