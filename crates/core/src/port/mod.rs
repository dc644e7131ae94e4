// Port Layer - Interfaces for external dependencies

pub mod file_transport;
pub mod id_provider; // For deterministic testing
pub mod mail_transport;
pub mod push_transport;
pub mod resource_probe;
pub mod run_history;
pub mod time_provider;

// Re-exports
pub use file_transport::{FileSession, FileTransport};
pub use id_provider::{IdProvider, UuidProvider};
pub use mail_transport::{Attachment, MailSession, MailTransport};
pub use push_transport::{InMemoryPushTransport, PushTransport};
pub use resource_probe::{NullProbe, ResourceProbe};
pub use run_history::RunHistoryRepository;
pub use time_provider::{SystemTimeProvider, TimeProvider};
