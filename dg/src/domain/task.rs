//! Diagram tasks: the per-type unit of work inside a session

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::diagram::{Complexity, DetailLevel, DiagramType};
use super::quality::QualityReport;
use super::session::{Preferences, SessionId};

/// Diagram task status
///
/// `Queued -> Generating -> Evaluating -> {Succeeded | Repairing -> Generating | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Generating,
    Evaluating,
    Repairing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Generating => "generating",
            TaskStatus::Evaluating => "evaluating",
            TaskStatus::Repairing => "repairing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Transitions allowed by the state machine
    ///
    /// Any non-terminal state may fail; everything else follows the
    /// generate/evaluate/repair order.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Generating) => true,
            (Generating, Evaluating) => true,
            (Evaluating, Succeeded) | (Evaluating, Repairing) => true,
            (Repairing, Generating) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Transient service failures outlasted the stage retry budget
    Infrastructure { stage: String, message: String, retries: u32 },
    /// Non-retryable failure (malformed request, auth, disabled type)
    Permanent { stage: String, message: String },
    /// Attempt budget spent without reaching the threshold
    BelowThreshold { best_score: f64, threshold: f64 },
    /// The session hit its idle timeout before the task finished
    Expired,
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Infrastructure { .. } => "infrastructure",
            FailureReason::Permanent { .. } => "permanent",
            FailureReason::BelowThreshold { .. } => "below_threshold",
            FailureReason::Expired => "expired",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Infrastructure {
                stage,
                message,
                retries,
            } => write!(f, "infrastructure failure in {} after {} retries: {}", stage, retries, message),
            FailureReason::Permanent { stage, message } => write!(f, "permanent failure in {}: {}", stage, message),
            FailureReason::BelowThreshold { best_score, threshold } => {
                write!(f, "best score {:.1} stayed below threshold {:.1}", best_score, threshold)
            }
            FailureReason::Expired => write!(f, "session expired"),
        }
    }
}

/// Illegal state machine use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Attempt budget of {max} exhausted")]
    AttemptsExhausted { max: u32 },
}

/// One evaluated generation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub diagram: String,
    pub report: QualityReport,
}

/// The unit of work producing one diagram of one type
#[derive(Debug, Clone, Serialize)]
pub struct DiagramTask {
    pub session_id: SessionId,
    pub diagram_type: DiagramType,
    pub complexity: Complexity,
    pub detail_level: DetailLevel,
    max_attempts: u32,
    attempts: u32,
    status: TaskStatus,
    best: Option<Attempt>,
    evaluations: u32,
    failure: Option<FailureReason>,
    history: Vec<TaskStatus>,
}

impl DiagramTask {
    pub fn new(session_id: SessionId, diagram_type: DiagramType, preferences: &Preferences, max_attempts: u32) -> Self {
        debug!(%session_id, %diagram_type, %max_attempts, "DiagramTask::new: called");
        Self {
            session_id,
            diagram_type,
            complexity: preferences.complexity,
            detail_level: preferences.detail_level,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            status: TaskStatus::Queued,
            best: None,
            evaluations: 0,
            failure: None,
            history: vec![TaskStatus::Queued],
        }
    }

    /// Move to `next`, enforcing state-machine order and the attempt budget
    ///
    /// Entering `Generating` from `Queued` starts attempt 1; entering it from
    /// `Repairing` is the only way the count increases.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == TaskStatus::Generating {
            match self.status {
                TaskStatus::Queued => self.attempts = 1,
                TaskStatus::Repairing => {
                    if self.attempts >= self.max_attempts {
                        return Err(TaskError::AttemptsExhausted {
                            max: self.max_attempts,
                        });
                    }
                    self.attempts += 1;
                }
                _ => {}
            }
        }
        debug!(
            session_id = %self.session_id,
            diagram_type = %self.diagram_type,
            from = %self.status,
            to = %next,
            attempts = self.attempts,
            "DiagramTask::transition"
        );
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    /// Record an evaluated attempt, keeping the best-scoring one
    ///
    /// Only a strictly higher score replaces the retained attempt, so ties
    /// keep the earlier diagram.
    pub fn record_attempt(&mut self, diagram: String, report: QualityReport) {
        self.evaluations += 1;
        let better = self
            .best
            .as_ref()
            .map(|b| report.aggregate() > b.report.aggregate())
            .unwrap_or(true);
        debug!(attempt = self.attempts, score = report.aggregate(), better, "DiagramTask::record_attempt");
        if better {
            self.best = Some(Attempt {
                number: self.attempts,
                diagram,
                report,
            });
        }
    }

    /// Terminate as `Failed` with a reason
    ///
    /// An infrastructure failure while `Generating` never produced a diagram,
    /// so the pending attempt is taken back.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), TaskError> {
        let pending = self.status == TaskStatus::Generating;
        self.transition(TaskStatus::Failed)?;
        if pending && matches!(reason, FailureReason::Infrastructure { .. }) {
            self.attempts = self.attempts.saturating_sub(1);
            debug!(attempts = self.attempts, "DiagramTask::fail: generation attempt withdrawn");
        }
        self.failure = Some(reason);
        Ok(())
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn best(&self) -> Option<&Attempt> {
        self.best.as_ref()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.report.aggregate())
    }

    /// Number of quality reports produced for this task
    pub fn evaluations(&self) -> u32 {
        self.evaluations
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Every status the task has been in, oldest first
    pub fn history(&self) -> &[TaskStatus] {
        &self.history
    }
}
