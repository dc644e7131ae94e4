// Run History Facility - records every job run through a RunHistoryRepository

use std::rc::Rc;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::context::{Facility, Failure, JobHandle, Step};
use crate::domain::{parse_section, JobRun, SettingsSection};
use crate::error::Result;
use crate::facilities::job_status::JobStatus;
use crate::facilities::profiler::Profiler;
use crate::port::{IdProvider, RunHistoryRepository, TimeProvider};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunHistorySettings {
    /// Overrides the value the facility was built with
    pub record_tests: Option<bool>,
}

pub struct RunHistory {
    repository: Arc<dyn RunHistoryRepository>,
    clock: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    record_tests: bool,
    active: bool,
    run: Option<JobRun>,
}

impl RunHistory {
    pub fn new(
        repository: Arc<dyn RunHistoryRepository>,
        clock: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            repository,
            clock,
            ids,
            record_tests: false,
            active: false,
            run: None,
        }
    }

    pub fn recording_tests(mut self, record_tests: bool) -> Self {
        self.record_tests = record_tests;
        self
    }

    /// Run record of the current job, once started
    pub fn run(&self) -> Option<&JobRun> {
        self.run.as_ref()
    }
}

impl Facility for RunHistory {
    fn settings_section(&self) -> &'static str {
        "RunHistorySettings"
    }

    fn enter_job(&mut self, job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        let settings: RunHistorySettings = parse_section(self.settings_section(), settings)?;
        let record_tests = settings.record_tests.unwrap_or(self.record_tests);
        self.active = !job.is_test() || record_tests;
        self.run = None;
        Ok(())
    }

    fn first_step(&mut self, job: &JobHandle, _step: &Rc<Step>) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let run = JobRun::started(
            self.ids.generate_id(),
            job.name().to_string(),
            job.uuid().to_string(),
            job.is_test(),
            self.clock.now_millis(),
        );
        if let Err(e) = self.repository.record_start(&run) {
            warn!(job = %job.name(), error = %e, "Could not record run start");
        }
        self.run = Some(run);
        Ok(())
    }

    fn exit_job(&mut self, job: &JobHandle, failure: Option<&Failure<'_>>) -> Result<()> {
        let Some(run) = self.run.as_mut() else {
            return Ok(());
        };

        let error_count = job
            .facility_ref::<JobStatus>()
            .map(|status| status.error_count() as i64)
            .unwrap_or(0);
        run.finish(
            self.clock.now_millis(),
            error_count,
            failure.map(|f| f.error.to_string()),
        );
        run.profile = job
            .facility_ref::<Profiler>()
            .ok()
            .map(|profiler| profiler.as_json())
            .filter(|profile| !profile.is_null());

        if let Err(e) = self.repository.record_finish(run) {
            warn!(job = %job.name(), run_id = %run.run_id, error = %e, "Could not record run end");
        }
        Ok(())
    }
}
