// Resident memory probe
// reason: sysinfo for cross-platform process inspection
use std::sync::Mutex;

use sluice_core::port::ResourceProbe;
use sysinfo::{Pid, System};
use tracing::debug;

/// Reads the resident memory of the running process through sysinfo
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    /// Create a probe for the current process
    ///
    /// # Example
    /// ```ignore
    /// let profiler = Profiler::new(Arc::new(SysinfoProbe::new()));
    /// ```
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(error = %e, "Current process id unavailable, memory will not be profiled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn resident_memory(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}
