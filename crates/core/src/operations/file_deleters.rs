// File deleters - remove fetched files once an import is done

use tracing::debug;

use crate::context::step_with;
use crate::error::Result;
use crate::operations::{LocalFile, Mockable, Operation};

pub trait FileDeleter {
    fn delete_files(&self, files: &[LocalFile]) -> Result<()>;
}

impl Mockable for dyn FileDeleter {
    fn default_noop() -> Box<Self> {
        Box::new(NoOpFileDeleter)
    }
}

/// Leaves every file in place
pub struct NoOpFileDeleter;

impl FileDeleter for NoOpFileDeleter {
    fn delete_files(&self, files: &[LocalFile]) -> Result<()> {
        step_with("delete_files", format!("{} files", files.len()), || {
            for file in files {
                debug!(path = %file.path().display(), "Keeping file");
            }
            Ok(())
        })
    }
}

impl Operation for NoOpFileDeleter {
    type Interface = dyn FileDeleter;
    type Args = ();

    fn create(_args: ()) -> Result<Box<dyn FileDeleter>> {
        Ok(Box::new(NoOpFileDeleter))
    }
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every call and the files it was given
    #[derive(Clone, Default)]
    pub struct RecordingDeleter {
        pub calls: Arc<Mutex<Vec<Vec<LocalFile>>>>,
    }

    impl RecordingDeleter {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn deleted(&self) -> Vec<LocalFile> {
            self.calls.lock().unwrap().concat()
        }
    }

    impl FileDeleter for RecordingDeleter {
        fn delete_files(&self, files: &[LocalFile]) -> Result<()> {
            self.calls.lock().unwrap().push(files.to_vec());
            Ok(())
        }
    }
}
