// Job - one execution of an importer
//
// Owns one instance of every registered facility and the stack of open steps.
// Never reused: a new JobHandle is built for every run.

use std::any::TypeId;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::{error, info, trace};
use uuid::Uuid;

use crate::context::facility::{Facility, FacilityFactory, StepCall};
use crate::context::step::Step;
use crate::domain::{JobSettings, SettingsSection};
use crate::error::{AppError, Result};
use crate::facilities::mocking::AutoMock;

/// Everything needed to start a job
pub struct JobSpec {
    pub name: String,
    pub uuid: Uuid,
    pub settings: JobSettings,
    pub test: bool,
    pub report_sink: Rc<dyn ReportSink>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
            settings: JobSettings::new(),
            test: false,
            report_sink: Rc::new(TracingReportSink),
        }
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn test_run(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn with_report_sink(mut self, sink: Rc<dyn ReportSink>) -> Self {
        self.report_sink = sink;
        self
    }
}

/// Receives the end-of-job reports (logs, profiling, notifications)
pub trait ReportSink {
    fn publish(&self, job_name: &str, title: &str, body: &str);
}

/// Emits reports as tracing events
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn publish(&self, job_name: &str, title: &str, body: &str) {
        info!(job = %job_name, section = %title, "\n{}", body);
    }
}

/// Identity of a failure while it unwinds through nested steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailureId(u64);

/// A failure as seen by exit hooks
#[derive(Debug, Clone, Copy)]
pub struct Failure<'e> {
    pub id: FailureId,
    pub error: &'e AppError,
}

pub(crate) struct FacilitySlot {
    name: String,
    type_id: TypeId,
    facility: RefCell<Box<dyn Facility>>,
}

#[derive(Clone, Copy)]
enum Order {
    Registration,
    Reverse,
}

struct Outcome<T> {
    result: Result<T>,
    failure: Option<FailureId>,
}

struct JobInner {
    name: String,
    uuid: Uuid,
    test: bool,
    settings: JobSettings,
    facilities: Vec<FacilitySlot>,
    auto_mocks: Vec<AutoMock>,
    steps: RefCell<Vec<Rc<Step>>>,
    unwinding: RefCell<Option<(FailureId, String)>>,
    next_failure: Cell<u64>,
    report_sink: Rc<dyn ReportSink>,
}

/// Shared handle to a running job
#[derive(Clone)]
pub struct JobHandle {
    inner: Rc<JobInner>,
}

fn facility_type(facility: &dyn Facility) -> TypeId {
    facility.as_any().type_id()
}

fn busy(name: &str) -> AppError {
    AppError::Facility(format!("facility '{}' is busy", name))
}

struct StepGuard<'j> {
    job: &'j JobHandle,
    step: Rc<Step>,
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        self.job.pop_step(&self.step);
    }
}

impl JobHandle {
    pub(crate) fn new(
        spec: JobSpec,
        factories: &[(String, FacilityFactory)],
        auto_mocks: Vec<AutoMock>,
    ) -> Self {
        let facilities = factories
            .iter()
            .map(|(name, factory)| {
                let facility = factory();
                FacilitySlot {
                    name: name.clone(),
                    type_id: facility_type(&*facility),
                    facility: RefCell::new(facility),
                }
            })
            .collect();

        Self {
            inner: Rc::new(JobInner {
                name: spec.name,
                uuid: spec.uuid,
                test: spec.test,
                settings: spec.settings,
                facilities,
                auto_mocks,
                steps: RefCell::new(Vec::new()),
                unwinding: RefCell::new(None),
                next_failure: Cell::new(1),
                report_sink: spec.report_sink,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Isolated test run (auto-mocking enabled, reports printed)
    pub fn is_test(&self) -> bool {
        self.inner.test
    }

    pub fn settings(&self) -> &JobSettings {
        &self.inner.settings
    }

    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registration names, in hook order
    pub fn facility_names(&self) -> Vec<&str> {
        self.inner
            .facilities
            .iter()
            .map(|slot| slot.name.as_str())
            .collect()
    }

    pub fn has_facility<F: Facility>(&self) -> bool {
        self.slot_of::<F>().is_ok()
    }

    /// Mutable access to the job's facility of type `F`
    pub fn facility<F: Facility>(&self) -> Result<RefMut<'_, F>> {
        let slot = self.slot_of::<F>()?;
        let guard = slot
            .facility
            .try_borrow_mut()
            .map_err(|_| busy(&slot.name))?;
        RefMut::filter_map(guard, |f| (**f).as_any_mut().downcast_mut::<F>()).map_err(|_| {
            AppError::Internal(format!("facility '{}' has an unexpected type", slot.name))
        })
    }

    /// Shared access to the job's facility of type `F`
    pub fn facility_ref<F: Facility>(&self) -> Result<Ref<'_, F>> {
        let slot = self.slot_of::<F>()?;
        let guard = slot.facility.try_borrow().map_err(|_| busy(&slot.name))?;
        Ref::filter_map(guard, |f| (**f).as_any().downcast_ref::<F>()).map_err(|_| {
            AppError::Internal(format!("facility '{}' has an unexpected type", slot.name))
        })
    }

    fn slot_of<F: Facility>(&self) -> Result<&FacilitySlot> {
        let wanted = TypeId::of::<F>();
        self.inner
            .facilities
            .iter()
            .find(|slot| slot.type_id == wanted)
            .ok_or_else(|| {
                AppError::Facility(format!(
                    "job '{}' has no facility of type {}",
                    self.name(),
                    std::any::type_name::<F>()
                ))
            })
    }

    /// Operation types marked for auto-mocking when the job was created
    pub fn auto_mocks(&self) -> &[AutoMock] {
        &self.inner.auto_mocks
    }

    pub fn current_step(&self) -> Option<Rc<Step>> {
        self.inner.steps.borrow().last().cloned()
    }

    /// Names of the open steps, root first
    pub fn step_names(&self) -> Vec<String> {
        self.inner
            .steps
            .borrow()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn publish_report(&self, title: &str, body: &str) {
        self.inner.report_sink.publish(self.name(), title, body);
    }

    /// Run `f` inside a new step nested under the current one
    ///
    /// Facilities are notified on entry, wrap the call (first registered is
    /// outermost) and are notified in reverse order on exit. The step is
    /// closed whatever the outcome and the error is returned unchanged.
    pub fn run_step<T>(
        &self,
        name: &str,
        detail: Option<String>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let parent = self.current_step().ok_or_else(|| {
            AppError::Facility(format!("job '{}' has no open step", self.name()))
        })?;
        let step = Step::child_of(&parent, name, detail);
        self.push_step(step.clone());
        let _guard = StepGuard {
            job: self,
            step: step.clone(),
        };

        let result = self
            .dispatch(Order::Registration, |facility| facility.enter_step(self, &step))
            .and_then(|_| self.call_wrapped(&step, f));

        let outcome = self.outcome(result);
        self.unwind(outcome, |facility, failure| {
            facility.exit_step(self, &step, failure)
        })
        .result
    }

    /// enter_job, root step, body, exit_job
    pub(crate) fn run_body<T>(&self, body: impl FnOnce(&JobHandle) -> Result<T>) -> Result<T> {
        let empty = SettingsSection::new();
        self.dispatch(Order::Registration, |facility| {
            let section = self
                .inner
                .settings
                .section(facility.settings_section())
                .unwrap_or(&empty);
            facility.enter_job(self, section)
        })?;

        let outcome = self.run_root(body);
        self.unwind(outcome, |facility, failure| facility.exit_job(self, failure))
            .result
    }

    fn run_root<T>(&self, body: impl FnOnce(&JobHandle) -> Result<T>) -> Outcome<T> {
        let root = Step::root();
        self.push_step(root.clone());
        let _guard = StepGuard {
            job: self,
            step: root.clone(),
        };

        let result = self
            .dispatch(Order::Registration, |facility| facility.first_step(self, &root))
            .and_then(|_| {
                self.dispatch(Order::Registration, |facility| facility.enter_step(self, &root))
            })
            .and_then(|_| body(self));

        let outcome = self.outcome(result);
        let outcome = self.unwind(outcome, |facility, failure| {
            facility.last_step(self, &root, failure)
        });
        self.unwind(outcome, |facility, failure| {
            facility.exit_step(self, &root, failure)
        })
    }

    fn call_wrapped<T>(&self, step: &Rc<Step>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut output = None;
        {
            let mut call: StepCall<'_> = Box::new(|| {
                output = Some(f()?);
                Ok(())
            });
            for slot in self.inner.facilities.iter().rev() {
                let Ok(facility) = slot.facility.try_borrow() else {
                    trace!(facility = %slot.name, step = %step.name(), "Facility busy, step not wrapped");
                    continue;
                };
                call = facility.wrap_step(self, step, call);
            }
            call()?;
        }
        output.ok_or_else(|| {
            AppError::Internal(format!(
                "step '{}' completed without producing a value",
                step.name()
            ))
        })
    }

    /// Call `hook` on every facility, collecting the first error
    ///
    /// A facility whose own hook is on the stack (it opened a step from inside
    /// a hook) is skipped.
    fn dispatch(
        &self,
        order: Order,
        mut hook: impl FnMut(&mut dyn Facility) -> Result<()>,
    ) -> Result<()> {
        let slots: Vec<&FacilitySlot> = match order {
            Order::Registration => self.inner.facilities.iter().collect(),
            Order::Reverse => self.inner.facilities.iter().rev().collect(),
        };

        let mut first_error = None;
        for slot in slots {
            let Ok(mut facility) = slot.facility.try_borrow_mut() else {
                trace!(facility = %slot.name, "Facility is running a hook, not notified");
                continue;
            };
            if let Err(e) = hook(&mut **facility) {
                error!(job = %self.name(), facility = %slot.name, error = %e, "Facility hook failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run an exit-side hook in reverse order
    ///
    /// A hook error replaces the outcome; the replaced error is logged.
    fn unwind<T>(
        &self,
        outcome: Outcome<T>,
        mut hook: impl FnMut(&mut dyn Facility, Option<&Failure<'_>>) -> Result<()>,
    ) -> Outcome<T> {
        let hooked = {
            let failure = match (&outcome.result, outcome.failure) {
                (Err(error), Some(id)) => Some(Failure { id, error }),
                _ => None,
            };
            self.dispatch(Order::Reverse, |facility| hook(facility, failure.as_ref()))
        };

        match hooked {
            Ok(()) => outcome,
            Err(hook_error) => {
                if let Err(original) = &outcome.result {
                    error!(
                        job = %self.name(),
                        error = %original,
                        shadowed_by = %hook_error,
                        "Job error shadowed by a facility hook failure"
                    );
                }
                self.outcome(Err(hook_error))
            }
        }
    }

    fn outcome<T>(&self, result: Result<T>) -> Outcome<T> {
        let failure = self.track_failure(&result);
        Outcome { result, failure }
    }

    /// Same id while one error propagates outward unchanged, a new one otherwise
    fn track_failure<T>(&self, result: &Result<T>) -> Option<FailureId> {
        let error = match result {
            Ok(_) => {
                self.inner.unwinding.replace(None);
                return None;
            }
            Err(error) => error,
        };

        let rendered = error.to_string();
        let mut unwinding = self.inner.unwinding.borrow_mut();
        if let Some((id, message)) = unwinding.as_ref() {
            if *message == rendered {
                return Some(*id);
            }
        }

        let id = FailureId(self.inner.next_failure.get());
        self.inner.next_failure.set(id.0 + 1);
        *unwinding = Some((id, rendered));
        Some(id)
    }

    fn push_step(&self, step: Rc<Step>) {
        self.inner.unwinding.replace(None);
        self.inner.steps.borrow_mut().push(step);
    }

    fn pop_step(&self, step: &Rc<Step>) {
        let popped = self.inner.steps.borrow_mut().pop();
        assert!(
            matches!(&popped, Some(top) if Rc::ptr_eq(top, step)),
            "step stack out of balance in job '{}': expected to close '{}'",
            self.name(),
            step.name()
        );
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.inner.name)
            .field("uuid", &self.inner.uuid)
            .field("test", &self.inner.test)
            .field("steps", &self.step_names())
            .finish()
    }
}

pub mod mocks {
    use super::*;

    /// Captures published report sections
    #[derive(Default)]
    pub struct RecordingReportSink {
        sections: RefCell<Vec<(String, String)>>,
    }

    impl RecordingReportSink {
        pub fn titles(&self) -> Vec<String> {
            self.sections.borrow().iter().map(|(t, _)| t.clone()).collect()
        }

        pub fn section(&self, title: &str) -> Option<String> {
            self.sections
                .borrow()
                .iter()
                .find(|(t, _)| t == title)
                .map(|(_, body)| body.clone())
        }
    }

    impl ReportSink for RecordingReportSink {
        fn publish(&self, _job_name: &str, title: &str, body: &str) {
            self.sections
                .borrow_mut()
                .push((title.to_string(), body.to_string()));
        }
    }
}
