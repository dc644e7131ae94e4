// Application Layer - importers and the file import pipeline

pub mod importer;
pub mod panic_guard;
pub mod pipeline;

// Re-exports
pub use importer::{run, test, Catalog, ImportRequest, ImportSummary, Importer, Launcher};
pub use panic_guard::{execute_guarded, PanicGuardResult};
pub use pipeline::{FileImport, InputSet, TransformChain};
