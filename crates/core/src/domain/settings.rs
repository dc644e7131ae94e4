// Layered Job Settings
//
// One named section per facility ("LoggerSettings", "ProfilerSettings", ...).
// Layers are merged key by key, later layers win:
// defaults -> environment/config file -> per-job override -> command line.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

/// Settings of a single facility
pub type SettingsSection = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSettings {
    sections: BTreeMap<String, SettingsSection>,
}

impl JobSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    ///
    /// # Example
    /// ```text
    /// let settings = JobSettings::new().with("LoggerSettings", "level", "info");
    /// ```
    pub fn with(
        mut self,
        section: &str,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.set(section, key, value);
        self
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<serde_json::Value>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn section(&self, name: &str) -> Option<&SettingsSection> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &SettingsSection)> {
        self.sections.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Overlay `other` on top of `self`, key by key
    pub fn merge(&mut self, other: &JobSettings) {
        for (name, section) in &other.sections {
            let target = self.sections.entry(name.clone()).or_default();
            for (key, value) in section {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Merge layers in ascending precedence
    pub fn layered(layers: &[&JobSettings]) -> JobSettings {
        let mut merged = JobSettings::new();
        for layer in layers {
            merged.merge(layer);
        }
        merged
    }

    /// Build from a JSON object of the form `{"Section": {"key": value}}`
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(AppError::Config(
                "job settings must be an object of sections".to_string(),
            ));
        };

        let mut settings = JobSettings::new();
        for (name, section) in map {
            match section {
                serde_json::Value::Object(section) => {
                    settings.sections.insert(name, section);
                }
                other => {
                    return Err(AppError::Config(format!(
                        "settings section '{}' must be an object, got {}",
                        name, other
                    )))
                }
            }
        }
        Ok(settings)
    }
}

/// Resolve a typed settings struct from a merged section
///
/// Settings structs use `#[serde(default)]` so absent keys keep their defaults.
pub fn parse_section<T: DeserializeOwned>(name: &str, section: &SettingsSection) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(section.clone()))
        .map_err(|e| AppError::Config(format!("invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct SampleSettings {
        level: String,
        enabled: bool,
    }

    impl Default for SampleSettings {
        fn default() -> Self {
            Self {
                level: "debug".to_string(),
                enabled: true,
            }
        }
    }

    #[test]
    fn test_layer_precedence() {
        let defaults = JobSettings::new()
            .with("SampleSettings", "level", "debug")
            .with("SampleSettings", "enabled", true);
        let per_job = JobSettings::new().with("SampleSettings", "level", "info");
        let command_line = JobSettings::new().with("SampleSettings", "level", "error");

        let merged = JobSettings::layered(&[&defaults, &per_job, &command_line]);
        let section = merged.section("SampleSettings").unwrap();
        assert_eq!(section["level"], json!("error"));
        assert_eq!(section["enabled"], json!(true));
    }

    #[test]
    fn test_parse_section_uses_defaults() {
        let settings = JobSettings::new().with("SampleSettings", "level", "info");
        let parsed: SampleSettings =
            parse_section("SampleSettings", settings.section("SampleSettings").unwrap()).unwrap();
        assert_eq!(parsed.level, "info");
        assert!(parsed.enabled);
    }

    #[test]
    fn test_parse_section_type_mismatch_is_config_error() {
        let settings = JobSettings::new().with("SampleSettings", "enabled", "yes");
        let err = parse_section::<SampleSettings>(
            "SampleSettings",
            settings.section("SampleSettings").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_scalar_sections() {
        assert!(JobSettings::from_json(json!({"LoggerSettings": {"level": "info"}})).is_ok());
        assert!(JobSettings::from_json(json!({"LoggerSettings": 3})).is_err());
        assert!(JobSettings::from_json(json!([1, 2])).is_err());
    }
}
