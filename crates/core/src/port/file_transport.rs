// File Transport Port (FTP-like remote directories)

use crate::error::Result;

/// Opens sessions against one remote file server
pub trait FileTransport: Send + Sync {
    /// Connect and authenticate
    ///
    /// Connection and login failures are `AppError::Transport`.
    fn connect(&self) -> Result<Box<dyn FileSession>>;

    /// Human readable target, used in logs
    fn describe(&self) -> String;
}

/// An open, authenticated session
///
/// `retrieve` reports "not found"/"permission denied" replies as
/// `AppError::FileUnavailable` and everything else as `AppError::Transport`.
#[cfg_attr(test, mockall::automock)]
pub trait FileSession: Send {
    /// Names of the entries in `directory`
    fn list(&mut self, directory: &str) -> Result<Vec<String>>;

    /// Full contents of a remote file
    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Close the session; failures are only worth a warning
    fn close(&mut self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// In-memory file server
    ///
    /// Paths listed in `forbidden` answer like a permission error,
    /// `offline` makes every connection attempt fail.
    #[derive(Clone, Default)]
    pub struct InMemoryTransport {
        pub files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        pub forbidden: Arc<Mutex<Vec<String>>>,
        pub offline: Arc<Mutex<bool>>,
        pub connections: Arc<Mutex<usize>>,
    }

    impl InMemoryTransport {
        pub fn with_files(files: &[(&str, &str)]) -> Self {
            let transport = Self::default();
            {
                let mut stored = transport.files.lock().unwrap();
                for (path, content) in files {
                    stored.insert(path.to_string(), content.as_bytes().to_vec());
                }
            }
            transport
        }

        pub fn forbid(&self, path: &str) {
            self.forbidden.lock().unwrap().push(path.to_string());
        }

        pub fn set_offline(&self, offline: bool) {
            *self.offline.lock().unwrap() = offline;
        }
    }

    impl FileTransport for InMemoryTransport {
        fn connect(&self) -> Result<Box<dyn FileSession>> {
            if *self.offline.lock().unwrap() {
                return Err(AppError::Transport("connection refused".to_string()));
            }
            *self.connections.lock().unwrap() += 1;
            Ok(Box::new(InMemorySession {
                transport: self.clone(),
            }))
        }

        fn describe(&self) -> String {
            "memory://".to_string()
        }
    }

    struct InMemorySession {
        transport: InMemoryTransport,
    }

    impl FileSession for InMemorySession {
        fn list(&mut self, directory: &str) -> Result<Vec<String>> {
            let prefix = format!("{}/", directory.trim_end_matches('/'));
            Ok(self
                .transport
                .files
                .lock()
                .unwrap()
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .filter(|name| !name.contains('/'))
                .map(str::to_string)
                .collect())
        }

        fn retrieve(&mut self, path: &str) -> Result<Vec<u8>> {
            if self.transport.forbidden.lock().unwrap().iter().any(|p| p == path) {
                return Err(AppError::FileUnavailable {
                    path: path.to_string(),
                    reason: "550 Permission denied".to_string(),
                });
            }
            self.transport
                .files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::FileUnavailable {
                    path: path.to_string(),
                    reason: "550 No such file or directory".to_string(),
                })
        }

        fn close(&mut self) {}
    }
}
