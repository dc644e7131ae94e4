// Panic isolation for batch test runs
use std::any::Any;
use std::panic::{catch_unwind, UnwindSafe};
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked with this message
    Panicked(String),
}

impl<T> PanicGuardResult<T> {
    pub fn is_panicked(&self) -> bool {
        matches!(self, PanicGuardResult::Panicked(_))
    }
}

/// Execute a closure with panic isolation
///
/// One importer panicking must not stop `sluice test --all` from running the
/// others.
///
/// # Example
/// ```text
/// match execute_guarded(|| launcher.test(importer, kwargs, &overrides)) {
///     PanicGuardResult::Success(result) => report(result),
///     PanicGuardResult::Panicked(msg) => println!("panicked: {}", msg),
/// }
/// ```
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T + UnwindSafe,
{
    catch_unwind(f).map_or_else(
        |payload| {
            let message = panic_message(payload.as_ref());
            error!(panic_msg = %message, "Import panicked");
            PanicGuardResult::Panicked(message)
        },
        PanicGuardResult::Success,
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic".to_string())
}
