//! Session results as delivered to the caller

use serde::{Deserialize, Serialize};

use super::diagram::DiagramType;
use super::quality::{QualityRating, QualityReport};
use super::session::{SessionId, SessionStatus};
use super::task::{FailureReason, TaskStatus};

/// User-facing classification of one diagram task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Accepted by the quality loop
    Succeeded,
    /// A diagram exists but never reached the threshold
    BelowThreshold,
    /// No usable diagram
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::BelowThreshold => "below_threshold",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Final state of one diagram task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramOutcome {
    pub diagram_type: DiagramType,
    pub status: TaskStatus,
    pub outcome: OutcomeKind,
    /// Best-scoring diagram text, when any attempt was evaluated
    pub diagram: Option<String>,
    pub quality: Option<QualityReport>,
    /// Generation attempts made
    pub attempts: u32,
    /// Which attempt produced `diagram`
    pub best_attempt: Option<u32>,
    pub failure: Option<FailureReason>,
    /// Display warning, e.g. accepted below threshold
    pub warning: Option<String>,
}

/// Count of reports per rating band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingCounts {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

impl RatingCounts {
    pub fn add(&mut self, rating: QualityRating) {
        match rating {
            QualityRating::Excellent => self.excellent += 1,
            QualityRating::Good => self.good += 1,
            QualityRating::Fair => self.fair += 1,
            QualityRating::Poor => self.poor += 1,
        }
    }
}

/// Session-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_requested: usize,
    pub successful_diagrams: usize,
    pub below_threshold_diagrams: usize,
    pub failed_diagrams: usize,
    /// Tasks that produced at least one quality report
    pub evaluated_diagrams: usize,
    /// Mean aggregate score over evaluated tasks; 0 when none were evaluated
    pub average_quality_score: f64,
    pub ratings: RatingCounts,
    pub processing_time_ms: u64,
}

/// Everything a session produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub request: String,
    pub status: SessionStatus,
    pub requirement_summary: Option<String>,
    pub system_summary: Option<String>,
    pub guidance: Option<String>,
    pub diagrams: Vec<DiagramOutcome>,
    pub summary: SessionSummary,
}

impl SessionResult {
    pub fn diagram(&self, diagram_type: DiagramType) -> Option<&DiagramOutcome> {
        self.diagrams.iter().find(|d| d.diagram_type == diagram_type)
    }
}
