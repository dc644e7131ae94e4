// Push Transport Port (delivery of push notification payloads)

use std::sync::{Arc, Mutex};

use crate::error::Result;

pub trait PushTransport: Send + Sync {
    fn deliver(&self, payload: &serde_json::Value) -> Result<()>;
}

/// Keeps delivered payloads in memory
#[derive(Clone, Default)]
pub struct InMemoryPushTransport {
    pub delivered: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl InMemoryPushTransport {
    pub fn delivered(&self) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }
}

impl PushTransport for InMemoryPushTransport {
    fn deliver(&self, payload: &serde_json::Value) -> Result<()> {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(payload.clone());
        }
        Ok(())
    }
}
