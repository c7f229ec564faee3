//! Job records and the state machine they move through.

use crate::engine::MediaInfo;
use crate::error::{Error, FailureKind};
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle states of a job.
///
/// `Pending -> Running -> Validating -> {Succeeded | Failed}`. Failed is
/// reachable from every non-terminal state; no state is ever re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Validating,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Validating)
                | (Validating, Succeeded)
                | (Pending, Failed)
                | (Running, Failed)
                | (Validating, Failed)
        )
    }
}

/// A terminal failure, immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// What a successful job produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A transformed artifact on disk, still inside the job's namespace.
    File {
        path: PathBuf,
        file_name: String,
        content_type: &'static str,
        size_bytes: u64,
    },
    /// The structured record a probe produced.
    Metadata(MediaInfo),
}

/// Terminal result of a job: success payload or a typed failure.
pub type JobOutcome = std::result::Result<Outcome, Failure>;

/// One `{state, progress}` observation, as delivered to observers.
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdate {
    pub state: JobState,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

/// Snapshot record of a job, serialized as the API's job resource.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub operation: Operation,
    /// Name of the uploaded source, used to derive the download filename.
    pub source_name: String,
    pub state: JobState,
    /// Last reported completion fraction, `0.0..=1.0`.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, operation: Operation, source_name: impl Into<String>) -> Self {
        Self {
            id,
            operation,
            source_name: source_name.into(),
            state: JobState::Pending,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Current `{state, progress}` observation for this record.
    pub fn update(&self) -> JobUpdate {
        JobUpdate {
            state: self.state,
            progress: self.progress,
            error: self.error.clone(),
        }
    }

    /// Move to a new state. Returns false (and changes nothing) when the
    /// transition is not allowed, which makes terminal transitions naturally
    /// exactly-once.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        match next {
            JobState::Running => self.started_at = Some(Utc::now()),
            JobState::Succeeded => {
                self.progress = 1.0;
                self.completed_at = Some(Utc::now());
            }
            JobState::Failed => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Store a progress report. Last write wins; only meaningful while
    /// Running.
    pub fn set_progress(&mut self, fraction: f64) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.progress = fraction.clamp(0.0, 1.0);
        true
    }
}
