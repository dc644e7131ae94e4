// Run History Port (Interface)

use crate::domain::JobRun;
use crate::error::Result;

/// Persistence for job run records
pub trait RunHistoryRepository: Send + Sync {
    /// Insert a run that just started
    fn record_start(&self, run: &JobRun) -> Result<()>;

    /// Update a run that finished
    fn record_finish(&self, run: &JobRun) -> Result<()>;

    /// Most recent runs of a job, newest first
    fn recent(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct InMemoryRunHistory {
        pub runs: Arc<Mutex<Vec<JobRun>>>,
    }

    impl RunHistoryRepository for InMemoryRunHistory {
        fn record_start(&self, run: &JobRun) -> Result<()> {
            self.runs.lock().unwrap().push(run.clone());
            Ok(())
        }

        fn record_finish(&self, run: &JobRun) -> Result<()> {
            let mut runs = self.runs.lock().unwrap();
            match runs.iter_mut().find(|r| r.run_id == run.run_id) {
                Some(stored) => *stored = run.clone(),
                None => runs.push(run.clone()),
            }
            Ok(())
        }

        fn recent(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
            let runs = self.runs.lock().unwrap();
            Ok(runs
                .iter()
                .rev()
                .filter(|r| r.job_name == job_name)
                .take(limit)
                .cloned()
                .collect())
        }
    }
}
