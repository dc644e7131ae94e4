// Local File Deleter

use std::io::ErrorKind;

use sluice_core::error::{AppError, Result};
use sluice_core::operations::{FileDeleter, LocalFile, Operation};
use sluice_core::step_with;
use tracing::{debug, warn};

/// Removes fetched files from the local disk
///
/// A file that is already gone counts as deleted. Every file is attempted;
/// the first failure is returned afterwards.
pub struct LocalFileDeleter;

impl FileDeleter for LocalFileDeleter {
    fn delete_files(&self, files: &[LocalFile]) -> Result<()> {
        step_with("delete_files", format!("{} files", files.len()), || {
            let mut first_error: Option<AppError> = None;
            for file in files {
                match std::fs::remove_file(file.path()) {
                    Ok(()) => debug!(path = %file.path().display(), "Deleted"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(path = %file.path().display(), "Already deleted")
                    }
                    Err(e) => {
                        warn!(path = %file.path().display(), error = %e, "Could not delete file");
                        first_error.get_or_insert(AppError::Io(e));
                    }
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

impl Operation for LocalFileDeleter {
    type Interface = dyn FileDeleter;
    type Args = ();

    fn create(_args: ()) -> Result<Box<dyn FileDeleter>> {
        Ok(Box::new(LocalFileDeleter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletes_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.csv");
        std::fs::write(&present, "a\n1\n").unwrap();

        let files = vec![
            LocalFile::new("a.csv", present.clone()),
            LocalFile::new("b.csv", dir.path().join("b.csv")),
        ];
        LocalFileDeleter.delete_files(&files).unwrap();
        assert!(!present.exists());
    }

    #[test]
    fn test_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![LocalFile::new("dir", dir.path().to_path_buf())];
        let err = LocalFileDeleter.delete_files(&files).unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
