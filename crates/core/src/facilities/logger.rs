// Logger Facility
//
// Keeps an in-memory record of everything a job logs, tagged with the step
// path it was logged from, and forwards each record to tracing.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::context::{current_job, Facility, Failure, JobHandle, Step, StepCall};
use crate::domain::{parse_section, SettingsSection};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    /// Records below this level are dropped
    pub level: LogLevel,
    /// Emit the LOGS report at the end of test runs
    pub print_report: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            print_report: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Step path, e.g. `<root> > fetch_files > fetch_file`
    pub path: String,
    pub message: String,
}

#[derive(Default)]
pub struct Logger {
    settings: LoggerSettings,
    records: RefCell<Vec<LogRecord>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` against the job's current step
    pub fn log(&self, job: &JobHandle, level: LogLevel, message: impl Into<String>) {
        let path = job
            .current_step()
            .map(|step| step.path_label())
            .unwrap_or_default();
        self.record(level, path, message.into());
    }

    pub fn debug(&self, job: &JobHandle, message: impl Into<String>) {
        self.log(job, LogLevel::Debug, message);
    }

    pub fn info(&self, job: &JobHandle, message: impl Into<String>) {
        self.log(job, LogLevel::Info, message);
    }

    pub fn warning(&self, job: &JobHandle, message: impl Into<String>) {
        self.log(job, LogLevel::Warning, message);
    }

    pub fn error(&self, job: &JobHandle, message: impl Into<String>) {
        self.log(job, LogLevel::Error, message);
    }

    /// Records kept so far, oldest first
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.borrow().clone()
    }

    pub fn settings(&self) -> &LoggerSettings {
        &self.settings
    }

    fn record(&self, level: LogLevel, path: String, message: String) {
        if level < self.settings.level {
            return;
        }
        forward(level, &path, &message);
        self.records.borrow_mut().push(LogRecord {
            level,
            path,
            message,
        });
    }

    fn render(&self) -> String {
        self.records
            .borrow()
            .iter()
            .map(|r| format!("[{}] {}: {}", r.level, r.path, r.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn forward(level: LogLevel, path: &str, message: &str) {
    match level {
        LogLevel::Debug => debug!(step = %path, "{}", message),
        LogLevel::Info => info!(step = %path, "{}", message),
        LogLevel::Warning => warn!(step = %path, "{}", message),
        LogLevel::Error => error!(step = %path, "{}", message),
    }
}

/// Log through the job's Logger, or straight to tracing when it has none
pub fn log_to(job: &JobHandle, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match job.facility_ref::<Logger>() {
        Ok(logger) => logger.log(job, level, message),
        Err(_) => {
            let path = job
                .current_step()
                .map(|step| step.path_label())
                .unwrap_or_default();
            forward(level, &path, &message);
        }
    }
}

/// Log against the current job of this thread
pub fn log(level: LogLevel, message: impl Into<String>) {
    match current_job() {
        Ok(job) => log_to(&job, level, message),
        Err(_) => forward(level, "", &message.into()),
    }
}

impl Facility for Logger {
    fn settings_section(&self) -> &'static str {
        "LoggerSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        self.settings = parse_section(self.settings_section(), settings)?;
        self.records.borrow_mut().clear();
        Ok(())
    }

    fn wrap_step<'a>(&self, _job: &JobHandle, step: &Rc<Step>, call: StepCall<'a>) -> StepCall<'a> {
        let message = match step.detail() {
            Some(detail) => format!("Calling: {} with {}", step.name(), detail),
            None => format!("Calling: {}", step.name()),
        };
        self.record(LogLevel::Debug, step.path_label(), message);
        call
    }

    fn exit_job(&mut self, job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
        if job.is_test() && self.settings.print_report {
            job.publish_report("LOGS", &self.render());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::job::mocks::RecordingReportSink;
    use crate::context::{register_facility, run_job, step, step_with, JobSpec};
    use crate::domain::JobSettings;
    use uuid::Uuid;

    fn install() {
        register_facility("logger", || Box::new(Logger::new()));
    }

    #[test]
    fn test_records_carry_step_path() {
        install();
        let records = run_job(JobSpec::new("logging", Uuid::new_v4()), |job| {
            step("outer", || {
                step_with("inner", "a.csv".to_string(), || {
                    log(LogLevel::Info, "loaded 3 rows");
                    Ok(())
                })
            })?;
            Ok(job.facility_ref::<Logger>()?.records())
        })
        .unwrap();

        assert_eq!(records[0].message, "Calling: outer");
        assert_eq!(records[1].message, "Calling: inner with a.csv");
        assert_eq!(records[2].path, "<root> > outer > inner");
        assert_eq!(records[2].level, LogLevel::Info);
    }

    #[test]
    fn test_level_filtering_drops_lower_records() {
        install();
        let settings = JobSettings::new().with("LoggerSettings", "level", "warning");
        let records = run_job(
            JobSpec::new("filtered", Uuid::new_v4()).with_settings(settings),
            |job| {
                step("quiet", || {
                    log(LogLevel::Info, "hidden");
                    log(LogLevel::Error, "shown");
                    Ok(())
                })?;
                Ok(job.facility_ref::<Logger>()?.records())
            },
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "shown");
    }

    #[test]
    fn test_logs_report_only_for_test_runs() {
        install();
        let sink = Rc::new(RecordingReportSink::default());
        run_job(
            JobSpec::new("reported", Uuid::new_v4())
                .test_run(true)
                .with_report_sink(sink.clone()),
            |_| step("work", || Ok(())),
        )
        .unwrap();
        let body = sink.section("LOGS").unwrap();
        assert!(body.contains("[DEBUG] <root> > work: Calling: work"));

        let sink = Rc::new(RecordingReportSink::default());
        run_job(
            JobSpec::new("silent", Uuid::new_v4()).with_report_sink(sink.clone()),
            |_| step("work", || Ok(())),
        )
        .unwrap();
        assert!(sink.titles().is_empty());
    }

    #[test]
    fn test_unknown_level_is_config_error() {
        install();
        let settings = JobSettings::new().with("LoggerSettings", "level", "loud");
        let err = run_job(
            JobSpec::new("bad", Uuid::new_v4()).with_settings(settings),
            |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
