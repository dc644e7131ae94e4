// Importer - a named, schedulable import job and the launcher that runs it

use std::rc::Rc;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::context::{run_job, with_context, JobSpec, ReportSink, TracingReportSink};
use crate::domain::{render_kwargs_to_command_line, FacilityOverrides, JobSettings, KwargValue, Kwargs};
use crate::error::{AppError, Result};
use crate::port::{SystemTimeProvider, TimeProvider};

/// Inputs of one importer run
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub kwargs: Kwargs,
    /// Date the run considers "today", from the launcher's clock
    pub today: NaiveDate,
    pub test: bool,
}

impl ImportRequest {
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(KwargValue::as_scalar)
    }

    /// A list argument; absent lists are empty
    pub fn list(&self, key: &str) -> &[String] {
        self.kwargs
            .get(key)
            .and_then(KwargValue::as_list)
            .unwrap_or_default()
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.kwargs.get(key).and_then(KwargValue::as_flag)
    }

    pub fn required(&self, key: &str) -> Result<&str> {
        self.scalar(key)
            .ok_or_else(|| AppError::Config(format!("missing argument '{}=...'", key)))
    }

    /// Date argument in `format`, or `today` when absent
    pub fn date_or_today(&self, key: &str, format: &str) -> Result<NaiveDate> {
        match self.scalar(key) {
            Some(text) => NaiveDate::parse_from_str(text, format).map_err(|e| {
                AppError::Config(format!("argument '{}={}' is not a {} date: {}", key, text, format, e))
            }),
            None => Ok(self.today),
        }
    }
}

/// What an import did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub files: usize,
    pub rows: usize,
    /// Remote names the server refused, skipped by the import
    pub unavailable: Vec<String>,
}

pub trait Importer {
    /// Dotted name used on the command line, e.g. `partners::daily_accounts`
    fn name(&self) -> &str;

    fn uuid(&self) -> Uuid;

    /// Settings layered over the config defaults for this importer's jobs
    fn job_settings(&self) -> JobSettings {
        JobSettings::new()
    }

    /// Arguments used by `test` when the caller does not give them
    fn test_defaults(&self) -> Kwargs {
        Kwargs::new()
    }

    /// Job body
    fn execute(&self, request: &ImportRequest) -> Result<ImportSummary>;
}

/// Runs importers as jobs on the calling thread's context
pub struct Launcher {
    clock: Arc<dyn TimeProvider>,
    report_sink: Rc<dyn ReportSink>,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemTimeProvider),
            report_sink: Rc::new(TracingReportSink),
        }
    }
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_report_sink(mut self, sink: Rc<dyn ReportSink>) -> Self {
        self.report_sink = sink;
        self
    }

    /// Production run
    pub fn run(
        &self,
        importer: &dyn Importer,
        kwargs: Kwargs,
        overrides: &FacilityOverrides,
    ) -> Result<ImportSummary> {
        self.launch(importer, kwargs, overrides, false)
    }

    /// Test run: auto-mocks apply, reports are published, and the
    /// importer's test defaults fill in missing arguments
    pub fn test(
        &self,
        importer: &dyn Importer,
        kwargs: Kwargs,
        overrides: &FacilityOverrides,
    ) -> Result<ImportSummary> {
        let mut merged = importer.test_defaults();
        merged.extend(kwargs);
        self.launch(importer, merged, overrides, true)
    }

    fn launch(
        &self,
        importer: &dyn Importer,
        kwargs: Kwargs,
        overrides: &FacilityOverrides,
        test: bool,
    ) -> Result<ImportSummary> {
        let command_line = with_context(|ctx| {
            overrides.to_job_settings(|name| ctx.resolve_settings_section(name))
        })?;
        let settings = JobSettings::layered(&[&importer.job_settings(), &command_line]);

        let request = ImportRequest {
            kwargs,
            today: self.clock.today(),
            test,
        };
        info!(
            importer = %importer.name(),
            test,
            args = %render_kwargs_to_command_line(&request.kwargs).join(" "),
            "Launching import"
        );

        let spec = JobSpec::new(importer.name(), importer.uuid())
            .with_settings(settings)
            .test_run(test)
            .with_report_sink(Rc::clone(&self.report_sink));
        run_job(spec, |_| importer.execute(&request))
    }
}

/// Production run with the system clock
pub fn run(
    importer: &dyn Importer,
    kwargs: Kwargs,
    overrides: &FacilityOverrides,
) -> Result<ImportSummary> {
    Launcher::default().run(importer, kwargs, overrides)
}

/// Test run with the system clock
pub fn test(
    importer: &dyn Importer,
    kwargs: Kwargs,
    overrides: &FacilityOverrides,
) -> Result<ImportSummary> {
    Launcher::default().test(importer, kwargs, overrides)
}

/// Importers known to the runner, in registration order
#[derive(Default)]
pub struct Catalog {
    importers: Vec<Box<dyn Importer>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an importer; names must be unique
    pub fn register(&mut self, importer: Box<dyn Importer>) -> Result<()> {
        if self.importers.iter().any(|i| i.name() == importer.name()) {
            return Err(AppError::Config(format!(
                "importer '{}' is registered twice",
                importer.name()
            )));
        }
        self.importers.push(importer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&dyn Importer> {
        self.importers
            .iter()
            .find(|i| i.name() == name)
            .map(|i| i.as_ref())
            .ok_or_else(|| AppError::NotFound(format!("no importer named '{}'", name)))
    }

    /// Name and uuid of every importer
    pub fn list(&self) -> Vec<(String, Uuid)> {
        self.importers
            .iter()
            .map(|i| (i.name().to_string(), i.uuid()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Importer> {
        self.importers.iter().map(|i| i.as_ref())
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }
}
