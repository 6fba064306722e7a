use crate::error::{FailureDisposition, PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Job state enum; terminal states are `Complete`, `Error`, `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
    },
    Complete {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        actions_recorded: usize,
    },
    Error {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        disposition: FailureDisposition,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Complete { .. } => "complete",
            JobState::Error { .. } => "error",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete { .. } | JobState::Error { .. } | JobState::Cancelled { .. }
        )
    }
}

/// One pipeline job: a unit of work executed against the staging protocol.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub id: Uuid,
    pub name: String,
    /// Batch the resulting run should be attached to, if any
    pub batch_lsid: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Cooperative cancellation signal, polled between macro-steps
    cancel: CancellationToken,
}

impl PipelineJob {
    pub fn new_queued(name: impl Into<String>, batch_lsid: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            batch_lsid,
            state: JobState::Queued { queued_at: now },
            created_at: now,
            updated_at: now,
            cancel: CancellationToken::new(),
        }
    }

    /// Carry a previously assigned id, for re-creating a job wrapper
    /// after a crash. Identities derived from the id (staged paths, run
    /// LSID) are reproduced.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Handle for requesting cancellation from outside the job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: PipelineJob,
}

impl JobStateMachine {
    pub fn new(job: PipelineJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &PipelineJob {
        &self.job
    }

    pub fn into_job(self) -> PipelineJob {
        self.job
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running { started_at: now };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("running")),
        }
    }

    /// Transition: RUNNING → COMPLETE
    pub fn complete(&mut self, actions_recorded: usize) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.job.state = JobState::Complete {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    actions_recorded,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("complete")),
        }
    }

    /// Transition: RUNNING → ERROR
    pub fn fail(&mut self, error: String, disposition: FailureDisposition) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at } => {
                let now = Utc::now();
                self.job.state = JobState::Error {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    disposition,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("error")),
        }
    }

    /// Transition: any non-terminal state → CANCELLED
    pub fn cancel(&mut self, reason: String) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(self.invalid_transition("cancelled"));
        }

        let now = Utc::now();
        self.job.state = JobState::Cancelled {
            cancelled_at: now,
            reason,
        };
        self.job.updated_at = now;
        Ok(())
    }

    fn invalid_transition(&self, to: &str) -> PipelineError {
        PipelineError::InvalidStateTransition {
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }
}
