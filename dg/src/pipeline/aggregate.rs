//! Result aggregation
//!
//! Folds terminal diagram tasks into one `SessionResult`. Pure and total:
//! any mix of outcomes, including none at all, yields a well-formed result.

use std::time::Duration;

use tracing::debug;

use crate::domain::{
    DiagramOutcome, DiagramTask, FailureReason, OutcomeKind, RatingCounts, Session, SessionResult, SessionStatus,
    SessionSummary, StageContext, TaskStatus,
};

/// Classify one terminal task for display
pub fn outcome_kind(task: &DiagramTask) -> OutcomeKind {
    match (task.status(), task.failure()) {
        (TaskStatus::Succeeded, _) => OutcomeKind::Succeeded,
        (_, Some(FailureReason::BelowThreshold { .. })) if task.best().is_some() => OutcomeKind::BelowThreshold,
        _ => OutcomeKind::Failed,
    }
}

fn outcome(task: &DiagramTask, threshold: f64) -> DiagramOutcome {
    let kind = outcome_kind(task);
    let best = task.best();
    let warning = match (kind, task.best_score()) {
        (OutcomeKind::Succeeded, Some(score)) if score < threshold => Some(format!(
            "Accepted at {:.1}, below the quality threshold of {:.1}, because auto-fix is disabled",
            score, threshold
        )),
        (OutcomeKind::BelowThreshold, Some(score)) => Some(format!(
            "Best of {} attempts scored {:.1}, below the quality threshold of {:.1}",
            task.attempts(),
            score,
            threshold
        )),
        _ => None,
    };

    DiagramOutcome {
        diagram_type: task.diagram_type,
        status: task.status(),
        outcome: kind,
        diagram: best.map(|b| b.diagram.clone()),
        quality: best.map(|b| b.report.clone()),
        attempts: task.attempts(),
        best_attempt: best.map(|b| b.number),
        failure: task.failure().cloned(),
        warning,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Build the session result from its terminal tasks
///
/// Status is `completed` when at least one task produced a diagram, else
/// `failed`; the caller overrides it when the session expired.
pub fn aggregate(
    session: &Session,
    analysis: &StageContext,
    tasks: &[DiagramTask],
    processing_time: Duration,
) -> SessionResult {
    debug!(session_id = %session.id, tasks = tasks.len(), "aggregate: called");
    let threshold = session.preferences.quality_threshold;
    let diagrams: Vec<DiagramOutcome> = tasks.iter().map(|t| outcome(t, threshold)).collect();

    let mut summary = SessionSummary {
        total_requested: tasks.len(),
        processing_time_ms: processing_time.as_millis() as u64,
        ..Default::default()
    };
    let mut ratings = RatingCounts::default();
    let mut score_sum = 0.0;

    for (task, diagram) in tasks.iter().zip(&diagrams) {
        match diagram.outcome {
            OutcomeKind::Succeeded => summary.successful_diagrams += 1,
            OutcomeKind::BelowThreshold => summary.below_threshold_diagrams += 1,
            OutcomeKind::Failed => summary.failed_diagrams += 1,
        }
        // Tasks that never reached evaluation stay out of the average
        if task.evaluations() == 0 {
            continue;
        }
        if let Some(best) = task.best() {
            summary.evaluated_diagrams += 1;
            score_sum += best.report.aggregate();
            ratings.add(best.report.rating());
        }
    }

    if summary.evaluated_diagrams > 0 {
        summary.average_quality_score = round1(score_sum / summary.evaluated_diagrams as f64);
    }
    summary.ratings = ratings;

    let status = if diagrams.iter().any(|d| d.diagram.is_some()) {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    };

    debug!(
        session_id = %session.id,
        %status,
        successful = summary.successful_diagrams,
        below_threshold = summary.below_threshold_diagrams,
        failed = summary.failed_diagrams,
        "aggregate: done"
    );

    SessionResult {
        session_id: session.id.clone(),
        request: session.request.clone(),
        status,
        requirement_summary: analysis.requirement_summary().map(str::to_string),
        system_summary: analysis.system_summary().map(str::to_string),
        guidance: analysis.interaction_guidance().map(str::to_string),
        diagrams,
        summary,
    }
}
