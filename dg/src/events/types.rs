//! Pipeline progress events
//!
//! Everything observable about a session as it runs:
//! - Session lifecycle (started, finished, expired)
//! - Request-level analyses
//! - Per-diagram state machine transitions and outcomes
//! - Stage retries against the completion service

use serde::{Deserialize, Serialize};

use crate::domain::{DiagramType, SessionId, SessionStatus, TaskStatus};

/// Core event enum
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    // === Session Lifecycle ===
    /// Fan-out is about to begin
    SessionStarted {
        session_id: SessionId,
        diagram_types: Vec<DiagramType>,
    },

    /// A request-level stage finished
    AnalysisCompleted { session_id: SessionId, stage: String },

    /// A request-level stage failed; fan-out continues without its output
    AnalysisSkipped {
        session_id: SessionId,
        stage: String,
        error: String,
    },

    /// Result delivered
    SessionFinished {
        session_id: SessionId,
        status: SessionStatus,
        successful: usize,
        total: usize,
    },

    /// Idle timeout reached before every task finished
    SessionExpired { session_id: SessionId },

    // === Diagram Tasks ===
    /// A task's state machine moved
    TaskStateChanged {
        session_id: SessionId,
        diagram_type: DiagramType,
        from: TaskStatus,
        to: TaskStatus,
        attempt: u32,
    },

    /// An evaluation produced a score
    TaskEvaluated {
        session_id: SessionId,
        diagram_type: DiagramType,
        attempt: u32,
        score: f64,
    },

    /// A task reached a terminal state
    TaskFinished {
        session_id: SessionId,
        diagram_type: DiagramType,
        status: TaskStatus,
        best_score: Option<f64>,
        attempts: u32,
    },

    // === Stage Executor ===
    /// A transient failure is about to be retried
    StageRetry {
        session_id: SessionId,
        stage: String,
        retry: u32,
        delay_ms: u64,
        error: String,
    },
}

impl PipelineEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            PipelineEvent::SessionStarted { session_id, .. }
            | PipelineEvent::AnalysisCompleted { session_id, .. }
            | PipelineEvent::AnalysisSkipped { session_id, .. }
            | PipelineEvent::SessionFinished { session_id, .. }
            | PipelineEvent::SessionExpired { session_id }
            | PipelineEvent::TaskStateChanged { session_id, .. }
            | PipelineEvent::TaskEvaluated { session_id, .. }
            | PipelineEvent::TaskFinished { session_id, .. }
            | PipelineEvent::StageRetry { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::SessionStarted { .. } => "SessionStarted",
            PipelineEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            PipelineEvent::AnalysisSkipped { .. } => "AnalysisSkipped",
            PipelineEvent::SessionFinished { .. } => "SessionFinished",
            PipelineEvent::SessionExpired { .. } => "SessionExpired",
            PipelineEvent::TaskStateChanged { .. } => "TaskStateChanged",
            PipelineEvent::TaskEvaluated { .. } => "TaskEvaluated",
            PipelineEvent::TaskFinished { .. } => "TaskFinished",
            PipelineEvent::StageRetry { .. } => "StageRetry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::TaskStateChanged {
            session_id: SessionId::from_string("ses-1"),
            diagram_type: DiagramType::Flowchart,
            from: TaskStatus::Evaluating,
            to: TaskStatus::Repairing,
            attempt: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TaskStateChanged");
        assert_eq!(json["session_id"], "ses-1");
        assert_eq!(json["diagram_type"], "flowchart");
        assert_eq!(event.event_type(), "TaskStateChanged");
        assert_eq!(event.session_id().as_str(), "ses-1");
    }
}
