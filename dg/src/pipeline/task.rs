//! Per-diagram orchestrator
//!
//! Drives one `DiagramTask` through its state machine:
//!
//! ```text
//! Queued -> Generating -> Evaluating -> Succeeded
//!                ^             |
//!                |             +-> Repairing --+
//!                +-----------------------------+
//!                              +-> Failed
//! ```
//!
//! The quality loop is a bounded loop over explicit transitions; the task's
//! own transition guard enforces the attempt budget.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::capability::{StageKind, StageOutput};
use crate::domain::{DiagramTask, FailureReason, StageContext, TaskError, TaskStatus};
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::{ExecutionError, StageExecutor};
use crate::validation::SyntaxValidator;

/// Runs diagram tasks to a terminal state
#[derive(Clone)]
pub struct DiagramOrchestrator {
    executor: StageExecutor,
    validator: Arc<dyn SyntaxValidator>,
}

impl DiagramOrchestrator {
    pub fn new(executor: StageExecutor, validator: Arc<dyn SyntaxValidator>) -> Self {
        Self { executor, validator }
    }

    /// Drive `task` until it succeeds or fails
    ///
    /// Never returns an error: every failure is recorded on the task.
    pub async fn run(&self, mut task: DiagramTask, mut context: StageContext, events: &EventEmitter) -> DiagramTask {
        debug!(
            session_id = %task.session_id,
            diagram_type = %task.diagram_type,
            max_attempts = task.max_attempts(),
            "DiagramOrchestrator::run: called"
        );

        if let Err(e) = self.drive(&mut task, &mut context, events).await {
            // Only reachable through a state machine bug; keep the task terminal
            error!(diagram_type = %task.diagram_type, error = %e, "Task state machine rejected a transition");
            let reason = FailureReason::Permanent {
                stage: "orchestrator".to_string(),
                message: e.to_string(),
            };
            let _ = fail(&mut task, reason, events);
        }

        match task.status() {
            TaskStatus::Succeeded => info!(
                diagram_type = %task.diagram_type,
                attempts = task.attempts(),
                score = task.best_score().unwrap_or_default(),
                "Diagram succeeded"
            ),
            _ => match task.failure() {
                Some(reason @ FailureReason::BelowThreshold { .. }) => warn!(
                    diagram_type = %task.diagram_type,
                    attempts = task.attempts(),
                    %reason,
                    "Diagram stayed below threshold"
                ),
                reason => error!(
                    diagram_type = %task.diagram_type,
                    attempts = task.attempts(),
                    reason = %reason.map(|f| f.to_string()).unwrap_or_default(),
                    "Diagram failed"
                ),
            },
        }

        events.emit(PipelineEvent::TaskFinished {
            session_id: events.session_id().clone(),
            diagram_type: task.diagram_type,
            status: task.status(),
            best_score: task.best_score(),
            attempts: task.attempts(),
        });
        task
    }

    async fn drive(
        &self,
        task: &mut DiagramTask,
        context: &mut StageContext,
        events: &EventEmitter,
    ) -> Result<(), TaskError> {
        let diagram_type = task.diagram_type;
        let threshold = context.preferences().quality_threshold;
        let auto_fix = context.preferences().auto_fix;

        let mut stage = StageKind::Generate(diagram_type);
        advance(task, TaskStatus::Generating, events)?;

        loop {
            let diagram = match self.invoke(stage, context, events).await.and_then(|out| {
                out.into_diagram(stage)
                    .map_err(|error| ExecutionError { stage, error, retries: 0 })
            }) {
                Ok(diagram) => diagram,
                Err(e) => return fail(task, e.failure_reason(), events),
            };
            context.record_diagram(diagram.clone());
            advance(task, TaskStatus::Evaluating, events)?;

            let report = match self.invoke(StageKind::Evaluate, context, events).await.and_then(|out| {
                out.into_report(StageKind::Evaluate).map_err(|error| ExecutionError {
                    stage: StageKind::Evaluate,
                    error,
                    retries: 0,
                })
            }) {
                Ok(report) => report,
                Err(e) => return fail(task, e.failure_reason(), events),
            };

            let score = report.aggregate();
            debug!(%diagram_type, attempt = task.attempts(), score, threshold, "drive: evaluated");
            events.task_evaluated(diagram_type, task.attempts(), score);
            context.record_report(report.clone());
            task.record_attempt(diagram, report.clone());

            if score >= threshold {
                return advance(task, TaskStatus::Succeeded, events);
            }
            if !auto_fix {
                debug!(%diagram_type, score, "drive: auto-fix disabled, accepting below threshold");
                return advance(task, TaskStatus::Succeeded, events);
            }
            if !task.can_retry() {
                let best_score = task.best_score().unwrap_or(score);
                return fail(task, FailureReason::BelowThreshold { best_score, threshold }, events);
            }

            advance(task, TaskStatus::Repairing, events)?;
            context.push_repair_guidance(self.validator.repair_hint(&report));
            stage = StageKind::Repair(diagram_type);
            advance(task, TaskStatus::Generating, events)?;
        }
    }

    async fn invoke(
        &self,
        stage: StageKind,
        context: &StageContext,
        events: &EventEmitter,
    ) -> Result<StageOutput, ExecutionError> {
        self.executor.execute(stage, context, events).await
    }
}

fn advance(task: &mut DiagramTask, next: TaskStatus, events: &EventEmitter) -> Result<(), TaskError> {
    let from = task.status();
    task.transition(next)?;
    events.task_state_changed(task.diagram_type, from, next, task.attempts());
    Ok(())
}

fn fail(task: &mut DiagramTask, reason: FailureReason, events: &EventEmitter) -> Result<(), TaskError> {
    let from = task.status();
    debug!(diagram_type = %task.diagram_type, %from, reason = %reason, "fail: called");
    task.fail(reason)?;
    events.task_state_changed(task.diagram_type, from, TaskStatus::Failed, task.attempts());
    Ok(())
}
