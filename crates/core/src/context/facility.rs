// Facility Protocol
//
// A facility is a per-job singleton notified at seven points of a job's
// lifetime. Every hook defaults to a no-op.

use std::any::Any;
use std::rc::Rc;

use crate::context::job::{Failure, JobHandle};
use crate::context::step::Step;
use crate::domain::SettingsSection;
use crate::error::Result;

/// A step body after type erasure, as handed to `wrap_step`
pub type StepCall<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Creates a fresh facility for every job
pub type FacilityFactory = Rc<dyn Fn() -> Box<dyn Facility>>;

/// Downcasting support for facility lookup by type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Cross-cutting capability attached to every job
///
/// Hook order for a job with facilities `[A, B]`:
///
/// ```text
/// A.enter_job  B.enter_job
/// A.first_step B.first_step      (root step)
/// A.enter_step B.enter_step      (root step)
///   ... body: every step is entered A,B / wrapped A(B(call)) / exited B,A ...
/// B.last_step  A.last_step
/// B.exit_step  A.exit_step       (root step)
/// B.exit_job   A.exit_job
/// ```
///
/// The job handle is passed to each hook; facilities must not keep it, since
/// the job owns them.
pub trait Facility: AsAny {
    /// Name of the settings section this facility reads, e.g. `LoggerSettings`
    fn settings_section(&self) -> &'static str;

    fn enter_job(&mut self, _job: &JobHandle, _settings: &SettingsSection) -> Result<()> {
        Ok(())
    }

    fn first_step(&mut self, _job: &JobHandle, _step: &Rc<Step>) -> Result<()> {
        Ok(())
    }

    fn enter_step(&mut self, _job: &JobHandle, _step: &Rc<Step>) -> Result<()> {
        Ok(())
    }

    /// Wrap the call of a step
    ///
    /// The returned closure runs after the facility is released, so it must
    /// look the facility up again through `job` if it needs its state.
    fn wrap_step<'a>(
        &self,
        _job: &JobHandle,
        _step: &Rc<Step>,
        call: StepCall<'a>,
    ) -> StepCall<'a> {
        call
    }

    fn exit_step(
        &mut self,
        _job: &JobHandle,
        _step: &Rc<Step>,
        _failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        Ok(())
    }

    fn last_step(
        &mut self,
        _job: &JobHandle,
        _step: &Rc<Step>,
        _failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        Ok(())
    }

    fn exit_job(&mut self, _job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
        Ok(())
    }
}
