// Resource probe port (process memory for the profiler)

/// Reports the resident memory of the current process
pub trait ResourceProbe: Send + Sync {
    /// Resident set size in bytes, `None` when the platform cannot tell
    fn resident_memory(&self) -> Option<u64>;
}

/// Probe used when no system adapter is wired in
pub struct NullProbe;

impl ResourceProbe for NullProbe {
    fn resident_memory(&self) -> Option<u64> {
        None
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Replays a scripted sequence of readings, then repeats the last one
    pub struct ScriptedProbe {
        readings: Arc<Mutex<Vec<u64>>>,
    }

    impl ScriptedProbe {
        pub fn new(readings: Vec<u64>) -> Self {
            let mut readings = readings;
            readings.reverse();
            Self {
                readings: Arc::new(Mutex::new(readings)),
            }
        }
    }

    impl ResourceProbe for ScriptedProbe {
        fn resident_memory(&self) -> Option<u64> {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.pop()
            } else {
                readings.last().copied()
            }
        }
    }
}
