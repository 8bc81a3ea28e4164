//! Domain types
//!
//! Sessions, diagram tasks, stage context, quality reports and results.
//! Everything here is plain data plus the state-machine rules that guard it.

mod context;
mod diagram;
mod quality;
mod result;
mod session;
mod task;

pub use context::StageContext;
pub use diagram::{Complexity, DetailLevel, DiagramType, ParseError};
pub use quality::{
    DimensionScores, QualityDimension, QualityIssue, QualityRating, QualityReport, QualityWeights, RatingThresholds,
};
pub use result::{DiagramOutcome, OutcomeKind, RatingCounts, SessionResult, SessionSummary};
pub use session::{Preferences, Session, SessionId, SessionStatus};
pub use task::{Attempt, DiagramTask, FailureReason, TaskError, TaskStatus};
