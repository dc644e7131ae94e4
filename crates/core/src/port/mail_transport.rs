// Mail Transport Port (IMAP-like mailboxes)

use std::collections::BTreeMap;

use crate::error::Result;

/// A decoded attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Opens sessions against one mail server
pub trait MailTransport: Send + Sync {
    /// Connect, log in and select `mailbox`
    fn open(&self, mailbox: &str) -> Result<Box<dyn MailSession>>;
}

/// An open session with a selected mailbox
pub trait MailSession {
    /// Message ids matching an IMAP search query such as `(SENTON "01-Mar-2016")`
    fn search(&mut self, query: &str) -> Result<Vec<String>>;

    /// Decoded headers of a message
    fn headers(&mut self, message_id: &str) -> Result<BTreeMap<String, String>>;

    /// Attachments of a message (the body part is not included)
    fn attachments(&mut self, message_id: &str) -> Result<Vec<Attachment>>;

    fn close(&mut self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct StoredMessage {
        pub id: String,
        pub headers: BTreeMap<String, String>,
        pub attachments: Vec<Attachment>,
    }

    /// Mailbox held in memory; `search` returns every message and records
    /// the query it was given
    #[derive(Clone, Default)]
    pub struct InMemoryMailbox {
        pub messages: Arc<Mutex<Vec<StoredMessage>>>,
        pub queries: Arc<Mutex<Vec<String>>>,
    }

    impl InMemoryMailbox {
        pub fn add(&self, message: StoredMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    impl MailTransport for InMemoryMailbox {
        fn open(&self, _mailbox: &str) -> Result<Box<dyn MailSession>> {
            Ok(Box::new(self.clone()))
        }
    }

    impl MailSession for InMemoryMailbox {
        fn search(&mut self, query: &str) -> Result<Vec<String>> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.id.clone())
                .collect())
        }

        fn headers(&mut self, message_id: &str) -> Result<BTreeMap<String, String>> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.headers.clone())
                .unwrap_or_default())
        }

        fn attachments(&mut self, message_id: &str) -> Result<Vec<Attachment>> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.attachments.clone())
                .unwrap_or_default())
        }

        fn close(&mut self) {}
    }
}
