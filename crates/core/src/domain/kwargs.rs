// Command-line kwargs grammar
//
//   key=value            scalar
//   key[]=v1 key[]=v2    list
//   key?=True|False      boolean
//   --Facility.key=value facility setting override (same suffixes)

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::settings::JobSettings;
use crate::error::{AppError, Result};

/// One parsed job parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum KwargValue {
    Scalar(String),
    List(Vec<String>),
    Flag(bool),
}

impl KwargValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            KwargValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            KwargValue::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            KwargValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            KwargValue::Scalar(s) => serde_json::Value::String(s.clone()),
            KwargValue::List(values) => serde_json::Value::Array(
                values
                    .iter()
                    .map(|v| serde_json::Value::String(v.clone()))
                    .collect(),
            ),
            KwargValue::Flag(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl From<&str> for KwargValue {
    fn from(s: &str) -> Self {
        KwargValue::Scalar(s.to_string())
    }
}

impl From<bool> for KwargValue {
    fn from(b: bool) -> Self {
        KwargValue::Flag(b)
    }
}

impl From<Vec<&str>> for KwargValue {
    fn from(values: Vec<&str>) -> Self {
        KwargValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Job parameters keyed by name
pub type Kwargs = BTreeMap<String, KwargValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Scalar,
    List,
    Flag,
}

fn usage(key: &str) -> String {
    format!(
        "Define only in one format:\n  {key}=value for a single value, or\n  \
         {key}[]=value1 {key}[]=value2 for list, or\n  {key}?=value for boolean"
    )
}

/// Parse `key=value`, `key[]=value` and `key?=True|False` tokens
///
/// A token without `=` carries an empty value. Defining a scalar or a boolean
/// twice, or the same key in more than one shape, is a configuration error.
pub fn compose_kwargs_from_command_line<S: AsRef<str>>(args: &[S]) -> Result<Kwargs> {
    let mut kwargs = Kwargs::new();
    let mut shapes: BTreeMap<String, Shape> = BTreeMap::new();

    for arg in args {
        let arg = arg.as_ref();
        let (raw_key, value) = arg.split_once('=').unwrap_or((arg, ""));

        let (key, shape) = if let Some(key) = raw_key.strip_suffix("[]") {
            (key, Shape::List)
        } else if let Some(key) = raw_key.strip_suffix('?') {
            (key, Shape::Flag)
        } else {
            (raw_key, Shape::Scalar)
        };

        if key.is_empty() {
            return Err(AppError::Config(format!("Argument '{}' has no name", arg)));
        }

        if let Some(previous) = shapes.get(key) {
            if *previous != shape {
                return Err(AppError::Config(format!(
                    "You defined more than one of '{key}', '{key}?' and '{key}[]':\n{}",
                    usage(key)
                )));
            }
            if shape != Shape::List {
                let shown = if shape == Shape::Flag {
                    format!("{}?", key)
                } else {
                    key.to_string()
                };
                return Err(AppError::Config(format!(
                    "You defined '{}' multiple times:\n{}",
                    shown,
                    usage(key)
                )));
            }
        }
        shapes.insert(key.to_string(), shape);

        match shape {
            Shape::Scalar => {
                kwargs.insert(key.to_string(), KwargValue::Scalar(value.to_string()));
            }
            Shape::Flag => {
                let flag = match value {
                    "True" | "true" => true,
                    "False" | "false" => false,
                    other => {
                        return Err(AppError::Config(format!(
                            "Boolean argument '{}?' must be True or False, got '{}'",
                            key, other
                        )))
                    }
                };
                kwargs.insert(key.to_string(), KwargValue::Flag(flag));
            }
            Shape::List => {
                if let KwargValue::List(values) = kwargs
                    .entry(key.to_string())
                    .or_insert_with(|| KwargValue::List(Vec::new()))
                {
                    values.push(value.to_string());
                }
            }
        }
    }

    Ok(kwargs)
}

/// Inverse of [`compose_kwargs_from_command_line`]
///
/// Empty lists render to nothing, so they do not survive a round trip.
pub fn render_kwargs_to_command_line(kwargs: &Kwargs) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in kwargs {
        match value {
            KwargValue::Scalar(s) => args.push(format!("{}={}", key, s)),
            KwargValue::List(values) => {
                args.extend(values.iter().map(|v| format!("{}[]={}", key, v)))
            }
            KwargValue::Flag(b) => {
                args.push(format!("{}?={}", key, if *b { "True" } else { "False" }))
            }
        }
    }
    args
}

/// Facility setting overrides taken from `--Facility.key=value` arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilityOverrides {
    entries: BTreeMap<String, Kwargs>,
}

impl FacilityOverrides {
    /// Parse the `--`-prefixed arguments (the prefix is stripped here)
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let stripped: Vec<&str> = args
            .iter()
            .map(|a| a.as_ref().trim_start_matches("--"))
            .collect();
        let kwargs = compose_kwargs_from_command_line(&stripped)?;

        let mut entries: BTreeMap<String, Kwargs> = BTreeMap::new();
        for (name, value) in kwargs {
            let Some((facility, setting)) = name.split_once('.') else {
                return Err(AppError::Config(format!(
                    "Settings facilities must be in the following format:\n\
                     --FacilityName.setting_name=value\n\
                     --FacilityName.setting_name[]=value\n\
                     (got '--{}')",
                    name
                )));
            };
            if facility.is_empty() || setting.is_empty() || setting.contains('.') {
                return Err(AppError::Config(format!(
                    "Invalid facility setting '--{}'",
                    name
                )));
            }
            entries
                .entry(facility.to_string())
                .or_default()
                .insert(setting.to_string(), value);
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn facilities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Turn the overrides into a settings layer
    ///
    /// `resolve_section` maps the facility name used on the command line to
    /// the settings section it overrides; `None` means no such facility.
    pub fn to_job_settings(
        &self,
        resolve_section: impl Fn(&str) -> Option<String>,
    ) -> Result<JobSettings> {
        let mut settings = JobSettings::new();
        for (facility, values) in &self.entries {
            let section = resolve_section(facility).ok_or_else(|| {
                AppError::Config(format!("No known facility named '{}'", facility))
            })?;
            for (key, value) in values {
                settings.set(&section, key, value.to_json());
            }
        }
        Ok(settings)
    }
}

/// A job invocation split into its own kwargs and facility overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandLine {
    pub kwargs: Kwargs,
    pub overrides: FacilityOverrides,
}

impl CommandLine {
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let (facility_args, job_args): (Vec<&str>, Vec<&str>) = args
            .iter()
            .map(AsRef::as_ref)
            .partition(|a| a.starts_with("--"));

        Ok(Self {
            kwargs: compose_kwargs_from_command_line(&job_args)?,
            overrides: FacilityOverrides::parse(&facility_args)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: Vec<(&str, KwargValue)>) -> Kwargs {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_compose_all_shapes() {
        let parsed = compose_kwargs_from_command_line(&[
            "simple=value",
            "list[]=first",
            "list[]=second",
            "singleton[]=alone",
            "flag?=True",
            "url=a=b",
        ])
        .unwrap();

        assert_eq!(
            parsed,
            kwargs(vec![
                ("simple", "value".into()),
                ("list", vec!["first", "second"].into()),
                ("singleton", vec!["alone"].into()),
                ("flag", true.into()),
                ("url", "a=b".into()),
            ])
        );
    }

    #[test]
    fn test_token_without_value_is_empty_scalar() {
        let parsed = compose_kwargs_from_command_line(&["bare"]).unwrap();
        assert_eq!(parsed["bare"], KwargValue::Scalar(String::new()));
    }

    #[test]
    fn test_duplicate_scalar_is_error() {
        let err = compose_kwargs_from_command_line(&["a=1", "a=2"]).unwrap_err();
        assert!(err.to_string().contains("multiple times"));
    }

    #[test]
    fn test_duplicate_flag_is_error() {
        assert!(compose_kwargs_from_command_line(&["a?=True", "a?=False"]).is_err());
    }

    #[test]
    fn test_mixed_shapes_is_error() {
        let err = compose_kwargs_from_command_line(&["a=1", "a[]=2"]).unwrap_err();
        assert!(err.to_string().contains("more than one of"));
        assert!(compose_kwargs_from_command_line(&["a[]=1", "a?=True"]).is_err());
    }

    #[test]
    fn test_invalid_boolean_literal() {
        assert!(compose_kwargs_from_command_line(&["a?=yes"]).is_err());
    }

    #[test]
    fn test_round_trip() {
        let cases = vec![
            kwargs(vec![]),
            kwargs(vec![("date", "2016-01-01".into())]),
            kwargs(vec![
                ("files", vec!["a.csv", "b.csv"].into()),
                ("mode", "full".into()),
                ("dry", false.into()),
            ]),
            kwargs(vec![("query", "x=1&y=2".into()), ("one", vec![""].into())]),
        ];

        for case in cases {
            let rendered = render_kwargs_to_command_line(&case);
            let parsed = compose_kwargs_from_command_line(&rendered).unwrap();
            assert_eq!(parsed, case, "round trip failed for {:?}", rendered);
        }
    }

    #[test]
    fn test_facility_overrides() {
        let overrides = FacilityOverrides::parse(&[
            "--Logger.level=info",
            "--JobStatus.ignore_warnings[]=deprecated",
            "--Profiler.enabled?=False",
        ])
        .unwrap();

        let settings = overrides
            .to_job_settings(|name| Some(format!("{}Settings", name)))
            .unwrap();
        assert_eq!(settings.section("LoggerSettings").unwrap()["level"], json!("info"));
        assert_eq!(
            settings.section("JobStatusSettings").unwrap()["ignore_warnings"],
            json!(["deprecated"])
        );
        assert_eq!(settings.section("ProfilerSettings").unwrap()["enabled"], json!(false));
    }

    #[test]
    fn test_facility_override_without_dot_is_error() {
        let err = FacilityOverrides::parse(&["--level=info"]).unwrap_err();
        assert!(err.to_string().contains("--FacilityName.setting_name=value"));
    }

    #[test]
    fn test_unknown_facility_is_error() {
        let overrides = FacilityOverrides::parse(&["--Nope.level=info"]).unwrap();
        let err = overrides.to_job_settings(|_| None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: No known facility named 'Nope'"
        );
    }

    #[test]
    fn test_command_line_split() {
        let cli = CommandLine::parse(&["date=2016-01-01", "--Logger.level=error"]).unwrap();
        assert_eq!(cli.kwargs["date"], "2016-01-01".into());
        assert_eq!(cli.overrides.facilities().collect::<Vec<_>>(), vec!["Logger"]);
    }
}
