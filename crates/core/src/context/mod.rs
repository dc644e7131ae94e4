//! Execution context
//!
//! The context is thread-local: every OS thread owns its facility
//! registrations, its auto-mock list and its stack of running jobs. A job is
//! pushed when it starts and popped when it ends, whatever the outcome, so
//! `current_job()` is always the innermost running job of the calling thread.

pub mod facility;
pub mod job;
pub mod step;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, info};

use crate::domain::JobSettings;
use crate::error::{AppError, Result};
use crate::facilities::mocking::AutoMock;

pub use facility::{AsAny, Facility, FacilityFactory, StepCall};
pub use job::{Failure, FailureId, JobHandle, JobSpec, ReportSink, TracingReportSink};
pub use step::{step, step_with, Step, PATH_SEPARATOR, ROOT_STEP_NAME};

struct Registration {
    name: String,
    /// Read once from a built facility when registered
    section: &'static str,
    factory: FacilityFactory,
}

/// Facility registry plus the stack of running jobs
#[derive(Default)]
pub struct Context {
    registrations: RefCell<Vec<Registration>>,
    auto_mocks: RefCell<Vec<AutoMock>>,
    defaults: RefCell<JobSettings>,
    jobs: RefCell<Vec<JobHandle>>,
}

thread_local! {
    static CONTEXT: Context = Context::default();
}

/// Run `f` against the calling thread's context
pub fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
    CONTEXT.with(f)
}

/// Register a facility factory on the calling thread's context
pub fn register_facility<F>(name: &str, factory: F)
where
    F: Fn() -> Box<dyn Facility> + 'static,
{
    with_context(|ctx| ctx.register_facility(name, factory));
}

/// Innermost running job of the calling thread
pub fn current_job() -> Result<JobHandle> {
    with_context(Context::current_job)
}

/// Run `body` as a job
///
/// The job is pushed on the context stack, its facilities are created and
/// notified, the body runs under the root step, and the job is popped again
/// even if the body or a hook failed.
///
/// # Example
/// ```text
/// let rows = run_job(JobSpec::new("imports::daily", uuid), |job| {
///     step("fetch", || fetcher.fetch_files(&files))
/// })?;
/// ```
pub fn run_job<T>(spec: JobSpec, body: impl FnOnce(&JobHandle) -> Result<T>) -> Result<T> {
    let job = with_context(|ctx| ctx.start_job(spec));
    let _guard = JobGuard { job: job.clone() };

    info!(job = %job.name(), uuid = %job.uuid(), test = job.is_test(), "Job started");
    let result = job.run_body(body);
    match &result {
        Ok(_) => info!(job = %job.name(), "Job finished"),
        Err(e) => error!(job = %job.name(), error = %e, kind = e.kind(), "Job failed"),
    }
    result
}

struct JobGuard {
    job: JobHandle,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        with_context(|ctx| ctx.pop_job(&self.job));
    }
}

impl Context {
    /// Add a facility, or replace the factory of an existing name in place
    pub fn register_facility<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Facility> + 'static,
    {
        let section = factory().settings_section();
        let factory: FacilityFactory = Rc::new(factory);
        let mut registrations = self.registrations.borrow_mut();
        match registrations.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                existing.section = section;
                existing.factory = factory;
            }
            None => registrations.push(Registration {
                name: name.to_string(),
                section,
                factory,
            }),
        }
    }

    pub fn unregister_facility(&self, name: &str) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let before = registrations.len();
        registrations.retain(|r| r.name != name);
        registrations.len() != before
    }

    /// Registration names, in hook order
    pub fn facility_names(&self) -> Vec<String> {
        self.registrations
            .borrow()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Mark an operation type for substitution in test-mode jobs
    pub fn auto_mock_for_local_testing(&self, mock: AutoMock) {
        let mut auto_mocks = self.auto_mocks.borrow_mut();
        if !auto_mocks.iter().any(|m| m.type_id == mock.type_id) {
            auto_mocks.push(mock);
        }
    }

    pub fn auto_mocks(&self) -> Vec<AutoMock> {
        self.auto_mocks.borrow().clone()
    }

    /// Settings applied under every job's own settings
    pub fn set_default_settings(&self, defaults: JobSettings) {
        *self.defaults.borrow_mut() = defaults;
    }

    pub fn default_settings(&self) -> JobSettings {
        self.defaults.borrow().clone()
    }

    /// Settings section overridden by `--<token>.key=value`
    ///
    /// `token` may be the registration name (`logger`), the section name
    /// (`LoggerSettings`) or the section name without its suffix (`Logger`),
    /// in any case.
    pub fn resolve_settings_section(&self, token: &str) -> Option<String> {
        self.registrations.borrow().iter().find_map(|registration| {
            let section = registration.section;
            let matches = registration.name.eq_ignore_ascii_case(token)
                || section.eq_ignore_ascii_case(token)
                || section
                    .strip_suffix("Settings")
                    .is_some_and(|short| short.eq_ignore_ascii_case(token));
            matches.then(|| section.to_string())
        })
    }

    pub fn current_job(&self) -> Result<JobHandle> {
        self.jobs
            .borrow()
            .last()
            .cloned()
            .ok_or_else(|| AppError::Facility("no job is running".to_string()))
    }

    /// Number of running jobs on this thread
    pub fn depth(&self) -> usize {
        self.jobs.borrow().len()
    }

    fn snapshot(&self) -> Vec<(String, FacilityFactory)> {
        self.registrations
            .borrow()
            .iter()
            .map(|r| (r.name.clone(), r.factory.clone()))
            .collect()
    }

    fn start_job(&self, mut spec: JobSpec) -> JobHandle {
        spec.settings = JobSettings::layered(&[&*self.defaults.borrow(), &spec.settings]);
        let factories = self.snapshot();
        let job = JobHandle::new(spec, &factories, self.auto_mocks());
        self.jobs.borrow_mut().push(job.clone());
        job
    }

    fn pop_job(&self, job: &JobHandle) {
        let popped = self.jobs.borrow_mut().pop();
        assert!(
            matches!(&popped, Some(top) if top.ptr_eq(job)),
            "job stack out of balance: expected to pop '{}'",
            job.name()
        );
    }
}
