// Temporary DB Facility
//
// Runs setup scripts before the job body and cleanup scripts after it, only
// against databases registered as disposable. Scripts go through the saver
// `S` with no data, so test runs get the saver's substitute.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::Deserialize;

use crate::context::{step, Facility, Failure, JobHandle, Step};
use crate::domain::{parse_section, SettingsSection};
use crate::error::{AppError, Result};
use crate::facilities::logger::{log_to, LogLevel};
use crate::facilities::registries::DbRegistry;
use crate::operations::{construct, Destination, Operation, Saver};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemporaryDbSettings {
    pub should_run: bool,
    /// Database alias -> SQL file run before the body
    pub setup_scripts: BTreeMap<String, String>,
    /// Database alias -> SQL file run after the body, even when it failed
    pub cleanup_scripts: BTreeMap<String, String>,
}

pub struct TemporaryDb<S> {
    settings: TemporaryDbSettings,
    _saver: PhantomData<S>,
}

impl<S> Default for TemporaryDb<S> {
    fn default() -> Self {
        Self {
            settings: TemporaryDbSettings::default(),
            _saver: PhantomData,
        }
    }
}

impl<S> TemporaryDb<S>
where
    S: Operation<Interface = dyn Saver, Args = Destination>,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn run_scripts(
        &self,
        job: &JobHandle,
        step_name: &str,
        scripts: &BTreeMap<String, String>,
    ) -> Result<()> {
        step(step_name, || {
            for (alias, script) in scripts {
                ensure_disposable(job, alias)?;
                log_to(job, LogLevel::Info, format!("{} {} with {}", step_name, alias, script));
                construct::<S>(Destination::file(alias.as_str(), script.as_str()))?.save_marker()?;
            }
            Ok(())
        })
    }
}

fn ensure_disposable(job: &JobHandle, alias: &str) -> Result<()> {
    let database = job.facility_ref::<DbRegistry>()?.get_database(alias)?;
    if !database.is_disposable {
        return Err(AppError::Config(format!(
            "cannot run temporary setup on a non-disposable database: {}",
            alias
        )));
    }
    Ok(())
}

impl<S> Facility for TemporaryDb<S>
where
    S: Operation<Interface = dyn Saver, Args = Destination>,
{
    fn settings_section(&self) -> &'static str {
        "TemporaryDbSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        self.settings = parse_section(self.settings_section(), settings)?;
        Ok(())
    }

    fn first_step(&mut self, job: &JobHandle, _step: &Rc<Step>) -> Result<()> {
        if !self.settings.should_run {
            return Ok(());
        }
        self.run_scripts(job, "Preparing DB", &self.settings.setup_scripts)
    }

    fn last_step(
        &mut self,
        job: &JobHandle,
        _step: &Rc<Step>,
        _failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        if !self.settings.should_run {
            return Ok(());
        }
        self.run_scripts(job, "Cleaning up DB", &self.settings.cleanup_scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{register_facility, run_job, JobSpec};
    use crate::domain::{JobSettings, TupleStream};
    use crate::facilities::app_config::{AppConfig, ConfigFacility};
    use serde_json::json;
    use std::cell::RefCell;
    use uuid::Uuid;

    thread_local! {
        static MARKERS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    }

    /// Saver that logs the destinations it ran markers against
    struct MarkerLog {
        destination: Destination,
    }

    impl Saver for MarkerLog {
        fn save(&self, _rows: TupleStream) -> Result<usize> {
            Ok(0)
        }

        fn save_marker(&self) -> Result<()> {
            MARKERS.with(|m| m.borrow_mut().push(self.destination.describe()));
            Ok(())
        }
    }

    impl Operation for MarkerLog {
        type Interface = dyn Saver;
        type Args = Destination;

        fn create(destination: Destination) -> Result<Box<dyn Saver>> {
            Ok(Box::new(MarkerLog { destination }))
        }
    }

    const SAMPLE: &str = r#"
[db_registry.scratch]
url = "sqlite::memory:"
is_disposable = true

[db_registry.warehouse]
url = "sqlite://warehouse.db"
"#;

    fn install() {
        let config = Rc::new(AppConfig::from_toml(SAMPLE).unwrap());
        register_facility("config", move || Box::new(ConfigFacility::new(Rc::clone(&config))));
        register_facility("db_registry", || Box::new(DbRegistry::new()));
        register_facility("temporary_db", || Box::new(TemporaryDb::<MarkerLog>::new()));
    }

    fn settings(alias: &str) -> JobSettings {
        JobSettings::new()
            .with("TemporaryDbSettings", "should_run", true)
            .with("TemporaryDbSettings", "setup_scripts", json!({ alias: "setup.sql" }))
            .with("TemporaryDbSettings", "cleanup_scripts", json!({ alias: "cleanup.sql" }))
    }

    #[test]
    fn test_setup_and_cleanup_around_failing_body() {
        install();
        let result = run_job(
            JobSpec::new("scratch", Uuid::new_v4()).with_settings(settings("scratch")),
            |job| -> Result<()> {
                assert_eq!(
                    MARKERS.with(|m| m.borrow().clone()),
                    vec!["scratch <- setup.sql"]
                );
                assert!(job.has_facility::<TemporaryDb<MarkerLog>>());
                Err(AppError::Data("boom".into()))
            },
        );

        assert!(matches!(result, Err(AppError::Data(_))));
        assert_eq!(
            MARKERS.with(|m| m.borrow().clone()),
            vec!["scratch <- setup.sql", "scratch <- cleanup.sql"]
        );
    }

    #[test]
    fn test_refuses_non_disposable_database() {
        install();
        let err = run_job(
            JobSpec::new("warehouse", Uuid::new_v4()).with_settings(settings("warehouse")),
            |_| Ok(()),
        )
        .unwrap_err();

        assert!(err.to_string().contains("non-disposable database: warehouse"));
        assert!(MARKERS.with(|m| m.borrow().is_empty()));
    }

    #[test]
    fn test_idle_unless_should_run() {
        install();
        run_job(JobSpec::new("idle", Uuid::new_v4()), |_| Ok(())).unwrap();
        assert!(MARKERS.with(|m| m.borrow().is_empty()));
    }
}
