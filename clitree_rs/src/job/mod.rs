//! Cancellable, deadline-aware jobs.
//!
//! - [`args`]: binding string arguments against a command's fields
//! - [`executor`]: the tick loop with started/finished boundary markers
//! - [`behaviors`]: what a command actually does per tick
//! - [`manager`]: invoke / subscribe / cancel over a shared command tree

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::model::CommandPath;

pub mod args;
pub mod behaviors;
pub mod executor;
pub mod manager;


pub use args::{BindError, BoundArgs, bind};
pub use behaviors::{Behaviors, TickBehavior};
pub use executor::{Behavior, Plan, execute};
pub use manager::{InvokeError, JobHandle, JobManager, JobPoll, JobSnapshot, JobSubscription};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    /// Pending→Running, then Running→terminal exactly once. A pending job
    /// may also go straight to Cancelled.
    pub fn advance(self, to: JobState) -> Result<JobState, TransitionError> {
        match (self, to) {
            (JobState::Pending, JobState::Running | JobState::Cancelled) => Ok(to),
            (JobState::Running, next) if next.is_terminal() => Ok(to),
            (from, to) => Err(TransitionError { from, to }),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The job's token was cancelled (caller, shutdown, Ctrl+C).
    Interrupted,
    DeadlineElapsed,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Cancelled { reason: CancelReason },
    Failed { message: String },
}

impl JobOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        JobOutcome::Failed {
            message: message.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }

    /// Only failures are user-visible errors.
    pub fn is_error(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => f.write_str("completed"),
            JobOutcome::Cancelled {
                reason: CancelReason::Interrupted,
            } => f.write_str("cancelled"),
            JobOutcome::Cancelled {
                reason: CancelReason::DeadlineElapsed,
            } => f.write_str("cancelled (deadline elapsed)"),
            JobOutcome::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Starts at 0, strictly increasing per job.
    pub seq: u64,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Everything a job reports, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started { at: DateTime<Utc> },
    Progress(ProgressEvent),
    Finished { outcome: JobOutcome, at: DateTime<Utc> },
}

impl JobEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobEvent::Finished { .. })
    }
}

/// Job identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One invocation of a resolved command. Never reused; a retry is a new job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub command_path: CommandPath,
    pub arguments: HashMap<String, String>,
    /// `None` means unbounded.
    pub deadline: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

/// Cancellation scope handed to the executor.
///
/// The deadline is fixed when the context is started, i.e. when the job
/// begins running, and behaves like an automatic cancellation.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: String,
    token: CancellationToken,
    deadline_at: Option<Instant>,
}

impl JobContext {
    /// Start the clock. A zero deadline is treated as unbounded.
    pub fn start(
        job_id: impl Into<String>,
        token: CancellationToken,
        deadline: Option<Duration>,
    ) -> Self {
        let deadline_at = deadline
            .filter(|d| !d.is_zero())
            .map(|d| Instant::now() + d);
        Self {
            job_id: job_id.into(),
            token,
            deadline_at,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline_at
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn done(&self) -> CancelReason {
        match self.deadline_at {
            Some(at) => tokio::select! {
                biased;
                _ = self.token.cancelled() => CancelReason::Interrupted,
                _ = tokio::time::sleep_until(at) => CancelReason::DeadlineElapsed,
            },
            None => {
                self.token.cancelled().await;
                CancelReason::Interrupted
            }
        }
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn lifecycle_allows_only_forward_single_transitions() {
        let running = JobState::Pending.advance(JobState::Running).unwrap();
        assert_eq!(running, JobState::Running);
        for terminal in [JobState::Completed, JobState::Cancelled, JobState::Failed] {
            assert_eq!(running.advance(terminal).unwrap(), terminal);
            assert!(terminal.advance(JobState::Running).is_err());
            assert!(terminal.advance(JobState::Completed).is_err());
        }
        assert!(JobState::Pending.advance(JobState::Completed).is_err());
        assert!(JobState::Pending.advance(JobState::Failed).is_err());
        assert_eq!(
            JobState::Pending.advance(JobState::Cancelled).unwrap(),
            JobState::Cancelled
        );
        assert!(JobState::Running.advance(JobState::Pending).is_err());
    }

    #[test]
    fn outcome_maps_to_terminal_state() {
        assert_eq!(JobOutcome::Completed.state(), JobState::Completed);
        let cancelled = JobOutcome::Cancelled {
            reason: CancelReason::DeadlineElapsed,
        };
        assert_eq!(cancelled.state(), JobState::Cancelled);
        assert!(!cancelled.is_error());
        assert!(JobOutcome::failed("boom").is_error());
        assert_eq!(cancelled.to_string(), "cancelled (deadline elapsed)");
    }

    #[test]
    fn events_serialize_with_tags() {
        let event = JobEvent::Finished {
            outcome: JobOutcome::failed("bad"),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["outcome"]["state"], "failed");
        assert_eq!(json["outcome"]["message"], "bad");
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_eq!(JobId::from(" abc ").as_str(), "abc");
    }
}
