// Job Status Facility
//
// Counts the errors of a job, whether reported explicitly or seen unwinding
// out of a step, and sends the completion summary.

use std::collections::HashSet;
use std::rc::Rc;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::context::{Facility, Failure, FailureId, JobHandle, Step};
use crate::domain::{parse_section, SettingsSection};
use crate::error::{AppError, Result};
use crate::facilities::logger::{log_to, LogLevel};
use crate::facilities::notifier::{Notifier, DEV_TEAM};
use crate::facilities::push_notifier::PushNotifier;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobStatusSettings {
    /// Warnings matching any of these patterns are not logged
    pub ignore_warnings: Vec<String>,
}

/// An error counted against the job
#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    /// Path of the step the error was recorded in
    pub step: String,
    pub message: String,
}

#[derive(Default)]
pub struct JobStatus {
    ignore_warnings: Vec<Regex>,
    errors: Vec<JobError>,
    seen: HashSet<FailureId>,
    /// Rendering of the failure recorded last, until something else is recorded
    last_failure: Option<String>,
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a problem the job recovered from
    ///
    /// An error that was already recorded while unwinding out of a step only
    /// gets `message` attached to its existing entry.
    pub fn error(&mut self, job: &JobHandle, message: &str, error: Option<&AppError>) {
        if let (Some(error), Some(last)) = (error, self.last_failure.take()) {
            if last == error.to_string() {
                if let Some(entry) = self.errors.last_mut() {
                    entry.message = format!("{}: {}", message, last);
                    return;
                }
            }
        }

        let message = match error {
            Some(error) => format!("{}: {}", message, error),
            None => message.to_string(),
        };
        let step = job
            .current_step()
            .map(|step| step.path_label())
            .unwrap_or_default();
        self.push(job, step, message);
    }

    pub fn warning(&self, job: &JobHandle, message: &str) {
        if self.ignore_warnings.iter().any(|pattern| pattern.is_match(message)) {
            debug!(job = %job.name(), warning = %message, "Warning ignored");
            return;
        }
        log_to(job, LogLevel::Warning, message);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[JobError] {
        &self.errors
    }

    fn push(&mut self, job: &JobHandle, step: String, message: String) {
        self.last_failure = None;
        log_to(job, LogLevel::Error, format!("Step '{}' failed: {}", step, message));
        self.errors.push(JobError { step, message });
    }

    /// Record a failure once, however many steps it unwinds through
    fn record_failure(&mut self, job: &JobHandle, step: &Step, failure: Option<&Failure<'_>>) {
        if let Some(failure) = failure {
            if self.seen.insert(failure.id) {
                let rendered = failure.error.to_string();
                self.push(job, step.path_label(), rendered.clone());
                self.last_failure = Some(rendered);
            }
        }
    }

    fn summary(&self, job: &JobHandle) -> String {
        match self.errors.len() {
            0 => format!("Job '{}' completed successfully", job.name()),
            n => format!("Job '{}' completed with {} errors!", job.name(), n),
        }
    }
}

/// Run `f`, counting its error against the job instead of failing
///
/// Returns `None` when `f` failed.
pub fn error_on_failure<T>(message: &str, f: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
    match f() {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            let job = crate::context::current_job()?;
            job.facility::<JobStatus>()?.error(&job, message, Some(&error));
            Ok(None)
        }
    }
}

impl Facility for JobStatus {
    fn settings_section(&self) -> &'static str {
        "JobStatusSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        let settings: JobStatusSettings = parse_section(self.settings_section(), settings)?;
        self.ignore_warnings = settings
            .ignore_warnings
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AppError::Config(format!("invalid ignore_warnings pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<_>>()?;
        self.errors.clear();
        self.seen.clear();
        self.last_failure = None;
        Ok(())
    }

    fn exit_step(
        &mut self,
        job: &JobHandle,
        step: &Rc<Step>,
        failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        self.record_failure(job, step, failure);
        Ok(())
    }

    fn last_step(
        &mut self,
        job: &JobHandle,
        step: &Rc<Step>,
        failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        self.record_failure(job, step, failure);

        let summary = self.summary(job);
        match job.facility::<Notifier>() {
            Ok(mut notifier) => notifier.notify(&[DEV_TEAM], &summary),
            Err(e) => debug!(job = %job.name(), error = %e, "Summary not sent"),
        }
        if let Ok(mut push) = job.facility::<PushNotifier>() {
            push.push_summary(job, self.errors.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{register_facility, run_job, step, JobSpec};
    use crate::domain::JobSettings;
    use crate::facilities::logger::Logger;
    use uuid::Uuid;

    fn install() {
        register_facility("logger", || Box::new(Logger::new()));
        register_facility("notifier", || Box::new(Notifier::new()));
        register_facility("job_status", || Box::new(JobStatus::new()));
    }

    fn deep_failure() -> Result<()> {
        step("a", || step("b", || step("c", || Err(AppError::Data("bad row".into())))))
    }

    #[test]
    fn test_deep_failure_counted_once() {
        install();
        let counted = Rc::new(std::cell::Cell::new(0));
        let probe = Rc::clone(&counted);
        let result = run_job(JobSpec::new("deep", Uuid::new_v4()), |job| {
            let outcome = deep_failure();
            probe.set(job.facility_ref::<JobStatus>()?.error_count());
            outcome
        });

        assert!(result.is_err());
        assert_eq!(counted.get(), 1);
    }

    #[test]
    fn test_recovered_errors_and_summary() {
        install();
        let (count, errors, sent) = run_job(JobSpec::new("partial", Uuid::new_v4()), |job| {
            let loaded = error_on_failure("Could not load a.csv", || {
                step("load", || -> Result<()> { Err(AppError::Data("ragged".into())) })
            })?;
            assert!(loaded.is_none());
            step("b", || Ok(()))?;

            let status = job.facility_ref::<JobStatus>()?;
            Ok((
                status.error_count(),
                status.errors().to_vec(),
                job.facility_ref::<Notifier>()?.notifications_for(DEV_TEAM),
            ))
        })
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(errors[0].step, "<root> > load");
        assert_eq!(errors[0].message, "Could not load a.csv: Data error: ragged");
        assert!(sent.is_empty());
    }

    #[test]
    fn test_explicit_error_without_failure() {
        install();
        let errors = run_job(JobSpec::new("explicit", Uuid::new_v4()), |job| {
            step("validate", || {
                let job = crate::context::current_job()?;
                job.facility::<JobStatus>()?.error(&job, "3 rows had no account", None);
                Ok(())
            })?;
            Ok(job.facility_ref::<JobStatus>()?.errors().to_vec())
        })
        .unwrap();

        assert_eq!(
            errors,
            vec![JobError {
                step: "<root> > validate".to_string(),
                message: "3 rows had no account".to_string(),
            }]
        );
    }

    #[test]
    fn test_summary_sent_at_last_step() {
        install();
        let sent = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&sent);
        register_facility("summary_probe", move || {
            Box::new(SummaryProbe {
                sink: Rc::clone(&sink),
            })
        });

        let _ = run_job(JobSpec::new("summarised", Uuid::new_v4()), |_| deep_failure());
        assert_eq!(*sent.borrow(), vec!["Job 'summarised' completed with 1 errors!"]);

        sent.borrow_mut().clear();
        run_job(JobSpec::new("clean", Uuid::new_v4()), |_| Ok(())).unwrap();
        assert_eq!(*sent.borrow(), vec!["Job 'clean' completed successfully"]);
    }

    /// Reads the notifier once every last_step has run
    struct SummaryProbe {
        sink: Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl Facility for SummaryProbe {
        fn settings_section(&self) -> &'static str {
            "SummaryProbeSettings"
        }

        fn exit_job(&mut self, job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
            *self.sink.borrow_mut() = job.facility_ref::<Notifier>()?.notifications_for(DEV_TEAM);
            Ok(())
        }
    }

    #[test]
    fn test_ignored_warnings() {
        install();
        let settings =
            JobSettings::new().with("JobStatusSettings", "ignore_warnings", vec!["^deprecated"]);
        let records = run_job(
            JobSpec::new("warned", Uuid::new_v4()).with_settings(settings),
            |job| {
                let status = job.facility_ref::<JobStatus>()?;
                status.warning(job, "deprecated column 'x'");
                status.warning(job, "empty file a.csv");
                drop(status);
                Ok(job.facility_ref::<Logger>()?.records())
            },
        )
        .unwrap();

        let warnings: Vec<&str> = records
            .iter()
            .filter(|r| r.level == LogLevel::Warning)
            .map(|r| r.message.as_str())
            .collect();
        assert_eq!(warnings, vec!["empty file a.csv"]);
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        install();
        let settings = JobSettings::new().with("JobStatusSettings", "ignore_warnings", vec!["("]);
        let err = run_job(
            JobSpec::new("bad", Uuid::new_v4()).with_settings(settings),
            |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
