// Sluice Core - job runtime, facilities, operations and ports
// NO database, FTP or file-format code: adapters live in the infra crates

pub mod application;
pub mod context;
pub mod domain;
pub mod error;
pub mod facilities;
pub mod operations;
pub mod port;

pub use application::{Catalog, FileImport, ImportRequest, ImportSummary, Importer, InputSet, Launcher, TransformChain};
pub use context::{current_job, register_facility, run_job, step, step_with, with_context, JobHandle, JobSpec};
pub use error::{AppError, Result};
pub use facilities::{register_default_facilities, AppConfig, FacilityAdapters};
pub use operations::{auto_mock_for_local_testing, construct};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
