//! Operations
//!
//! Stateless capabilities used by importers: fetchers, loaders, database
//! lookups, savers, file deleters and the pure row transforms. Every concrete
//! operation is built through [`construct`], which lets the running job
//! substitute it.
//!
//! # Example
//! ```text
//! let fetcher = construct::<FtpFetcher>("partner_ftp".to_string())?;
//! let files = fetcher.fetch_from_search(&query)?;
//! ```

pub mod aggregators;
pub mod casters;
pub mod db_loaders;
pub mod email;
pub mod fetchers;
pub mod file_deleters;
pub mod formatters;
pub mod loaders;
pub mod savers;
pub mod transformers;

use tracing::debug;

use crate::context::{current_job, with_context};
use crate::error::Result;
use crate::facilities::mocking::{short_type_name, AutoMock, MockRegistry};

pub use db_loaders::{DbLoader, DbSource, NoOpDbLoader};
pub use email::EmailFetcher;
pub use fetchers::{FetchOutcome, Fetcher, LocalFile, NoOpFetcher, RemoteFetcher, SearchQuery};
pub use file_deleters::{FileDeleter, NoOpFileDeleter};
pub use loaders::{Loader, NoOpLoader};
pub use savers::{Destination, PrintSaver, QuerySource, Saver};

/// Interface with a do-nothing implementation used for substitution
pub trait Mockable {
    fn default_noop() -> Box<Self>;
}

/// A concrete operation type
pub trait Operation: 'static {
    /// Trait object callers receive, e.g. `dyn Fetcher`
    type Interface: ?Sized + Mockable + 'static;
    /// Construction arguments, e.g. a registry alias
    type Args: 'static;

    fn create(args: Self::Args) -> Result<Box<Self::Interface>>;
}

/// Build `T`, or its replacement if the running job's mock registry has one
pub fn construct<T: Operation>(args: T::Args) -> Result<Box<T::Interface>> {
    let mut replacement = None;
    if let Ok(job) = current_job() {
        if let Ok(registry) = job.facility_ref::<MockRegistry>() {
            replacement = registry.constructor_for::<T>();
        }
    }

    match replacement {
        Some(constructor) => {
            debug!(operation = %short_type_name::<T>(), "Constructing replacement");
            constructor(args)
        }
        None => T::create(args),
    }
}

/// Substitute `T` with its interface's no-op in every test-mode job
pub fn auto_mock_for_local_testing<T: Operation>() {
    with_context(|ctx| ctx.auto_mock_for_local_testing(AutoMock::of::<T>()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{register_facility, run_job, JobSpec};
    use std::path::PathBuf;
    use uuid::Uuid;

    struct LocalOnly;

    impl Operation for LocalOnly {
        type Interface = dyn Fetcher;
        type Args = PathBuf;

        fn create(root: PathBuf) -> Result<Box<dyn Fetcher>> {
            Ok(Box::new(NoOpFetcher::rooted_at(root)))
        }
    }

    #[test]
    fn test_construct_outside_job_uses_create() {
        let fetcher = construct::<LocalOnly>(PathBuf::from("/data")).unwrap();
        let file = fetcher.fetch_file("in.csv").unwrap();
        assert_eq!(file.path(), PathBuf::from("/data/in.csv").as_path());
    }

    #[test]
    fn test_auto_mock_for_local_testing_substitutes_noop() {
        register_facility("mock_registry", || Box::new(MockRegistry::new()));
        auto_mock_for_local_testing::<LocalOnly>();

        let path = run_job(JobSpec::new("t", Uuid::new_v4()).test_run(true), |_| {
            let fetcher = construct::<LocalOnly>(PathBuf::from("/data"))?;
            Ok(fetcher.fetch_file("in.csv")?.path().to_path_buf())
        })
        .unwrap();

        assert_eq!(path, PathBuf::from("in.csv"));
    }
}
