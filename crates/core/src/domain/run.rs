// Job Run record (local run history)

use serde::{Deserialize, Serialize};

/// Outcome of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "RUNNING"),
            RunState::Succeeded => write!(f, "SUCCEEDED"),
            RunState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunState::Running),
            "SUCCEEDED" => Ok(RunState::Succeeded),
            "FAILED" => Ok(RunState::Failed),
            other => Err(format!("unknown run state: {}", other)),
        }
    }
}

/// One execution of an importer, as kept in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: String,
    pub job_name: String,
    pub job_uuid: String,
    pub test: bool,
    pub state: RunState,

    pub started_at: i64, // epoch ms
    pub finished_at: Option<i64>,

    pub error_count: i64,
    pub error_message: Option<String>,
    pub profile: Option<serde_json::Value>,
}

impl JobRun {
    pub fn started(
        run_id: String,
        job_name: String,
        job_uuid: String,
        test: bool,
        started_at: i64,
    ) -> Self {
        Self {
            run_id,
            job_name,
            job_uuid,
            test,
            state: RunState::Running,
            started_at,
            finished_at: None,
            error_count: 0,
            error_message: None,
            profile: None,
        }
    }

    /// Close the run; a failure message marks it as failed
    pub fn finish(&mut self, finished_at: i64, error_count: i64, failure: Option<String>) {
        self.finished_at = Some(finished_at);
        self.error_count = error_count;
        self.state = if failure.is_some() {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        self.error_message = failure;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_state() {
        let mut run = JobRun::started("r1".into(), "job".into(), "u1".into(), false, 1_000);
        assert_eq!(run.state, RunState::Running);
        assert_eq!(run.duration_ms(), None);

        run.finish(1_500, 2, Some("boom".into()));
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.duration_ms(), Some(500));
        assert_eq!(run.error_count, 2);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [RunState::Running, RunState::Succeeded, RunState::Failed] {
            assert_eq!(state.to_string().parse::<RunState>().unwrap(), state);
        }
        assert!("DONE".parse::<RunState>().is_err());
    }
}
