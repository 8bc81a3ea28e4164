//! Session orchestrator
//!
//! Runs one admitted session: request-level analysis once, then a bounded
//! fan-out of independent diagram tasks, then aggregation. The session-level
//! idle timeout is the only deadline; individual tasks are never cut short.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use super::aggregate::aggregate;
use super::task::DiagramOrchestrator;
use crate::capability::StageKind;
use crate::config::PipelineConfig;
use crate::domain::{
    DiagramTask, DiagramType, FailureReason, Session, SessionId, SessionResult, SessionStatus, StageContext,
};
use crate::events::{EventBus, EventEmitter, PipelineEvent};
use crate::executor::StageExecutor;
use crate::registry::{RegistryError, SessionRegistry};
use crate::validation::SyntaxValidator;

/// Runs admitted sessions to a `SessionResult`
#[derive(Clone)]
pub struct SessionOrchestrator {
    registry: SessionRegistry,
    executor: StageExecutor,
    tasks: DiagramOrchestrator,
    events: EventBus,
    config: PipelineConfig,
}

impl SessionOrchestrator {
    pub fn new(
        registry: SessionRegistry,
        executor: StageExecutor,
        validator: Arc<dyn SyntaxValidator>,
        events: EventBus,
        config: PipelineConfig,
    ) -> Self {
        debug!(
            fan_out_limit = config.fan_out_limit,
            max_attempts = config.max_attempts,
            "SessionOrchestrator::new: called"
        );
        Self {
            registry,
            tasks: DiagramOrchestrator::new(executor.clone(), validator),
            executor,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Requested types, deduplicated in request order; defaults when empty
    pub fn resolve_types(&self, requested: &[DiagramType]) -> Vec<DiagramType> {
        let source = if requested.is_empty() {
            &self.config.default_types
        } else {
            requested
        };
        let mut types = Vec::with_capacity(source.len());
        for t in source {
            if !types.contains(t) {
                types.push(*t);
            }
        }
        types
    }

    /// Run an admitted session to completion
    ///
    /// Fails only when the session cannot be started (unknown, already
    /// started, or expired); every diagram-level failure is reported inside
    /// the result.
    pub async fn run(&self, session_id: &SessionId, requested: &[DiagramType]) -> Result<SessionResult, RegistryError> {
        debug!(%session_id, requested = requested.len(), "SessionOrchestrator::run: called");
        let session = self.registry.start(session_id).await?;
        let started = Instant::now();
        let emitter = self.events.emitter_for(session_id);
        let types = self.resolve_types(requested);

        info!(
            %session_id,
            types = ?types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "Session started"
        );
        emitter.emit(PipelineEvent::SessionStarted {
            session_id: session_id.clone(),
            diagram_types: types.clone(),
        });

        let deadline = tokio::time::Instant::now() + self.remaining(&session);

        let mut analysis = StageContext::for_request(session.request.as_str(), session.preferences.clone());
        let analyzed = tokio::time::timeout_at(deadline, self.analyze(&mut analysis, &emitter)).await;

        let (tasks, expired) = match analyzed {
            Ok(()) => self.fan_out(&session, &analysis, &types, deadline, &emitter).await,
            Err(_) => (Vec::new(), true),
        };
        let tasks = self.complete_tasks(&session, &types, tasks, expired);

        let mut result = aggregate(&session, &analysis, &tasks, started.elapsed());
        if expired {
            self.expire(&session, &emitter).await;
            result.status = SessionStatus::Expired;
        } else {
            match self.registry.finish(session_id, result.status).await {
                Ok(()) => {}
                Err(RegistryError::Expired(_)) => {
                    // The sweeper got there first; the slot is already free
                    warn!(%session_id, "Session expired before its result was recorded");
                    result.status = SessionStatus::Expired;
                }
                Err(RegistryError::Cancelled(_)) => {
                    info!(%session_id, "Session was cancelled while running");
                    result.status = SessionStatus::Cancelled;
                }
                Err(e) => warn!(%session_id, error = %e, "Could not record session outcome"),
            }
        }

        if let Err(e) = self.registry.retire(session_id).await {
            debug!(%session_id, error = %e, "run: retire skipped");
        }

        info!(
            %session_id,
            status = %result.status,
            successful = result.summary.successful_diagrams,
            below_threshold = result.summary.below_threshold_diagrams,
            failed = result.summary.failed_diagrams,
            elapsed_ms = result.summary.processing_time_ms,
            "Session finished"
        );
        emitter.emit(PipelineEvent::SessionFinished {
            session_id: session_id.clone(),
            status: result.status,
            successful: result.summary.successful_diagrams,
            total: result.summary.total_requested,
        });
        Ok(result)
    }

    /// Time left before the idle timeout, measured from admission
    fn remaining(&self, session: &Session) -> Duration {
        let age_ms = session.age_ms(chrono::Utc::now()).max(0) as u64;
        self.config
            .session_timeout()
            .saturating_sub(Duration::from_millis(age_ms))
    }

    /// Request-level stages, run once per session
    ///
    /// Failures here are not fatal: the tasks still run, just without the
    /// missing summary.
    async fn analyze(&self, context: &mut StageContext, emitter: &EventEmitter) {
        debug!(session_id = %emitter.session_id(), "analyze: called");

        if let Some(summary) = self.analysis_stage(StageKind::Requirement, context, emitter).await {
            context.record_requirement(summary);
        }
        if let Some(summary) = self.analysis_stage(StageKind::System, context, emitter).await {
            context.record_system(summary);
        }
        if self.config.interaction_optimization && self.executor.has_capability(StageKind::Interaction) {
            if let Some(guidance) = self.analysis_stage(StageKind::Interaction, context, emitter).await {
                context.record_interaction(guidance);
            }
        }
    }

    async fn analysis_stage(&self, stage: StageKind, context: &StageContext, emitter: &EventEmitter) -> Option<String> {
        let output = self
            .executor
            .execute(stage, context, emitter)
            .await
            .map_err(|e| e.error)
            .and_then(|out| out.into_text(stage));

        match output {
            Ok(text) => {
                debug!(%stage, len = text.len(), "analysis_stage: completed");
                emitter.emit(PipelineEvent::AnalysisCompleted {
                    session_id: emitter.session_id().clone(),
                    stage: stage.to_string(),
                });
                Some(text)
            }
            Err(e) => {
                warn!(session_id = %emitter.session_id(), %stage, error = %e, "Analysis stage failed, continuing without it");
                emitter.emit(PipelineEvent::AnalysisSkipped {
                    session_id: emitter.session_id().clone(),
                    stage: stage.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Spawn one task per enabled type and collect them until all finish
    /// or the deadline passes
    ///
    /// Returns the finished tasks and whether the deadline was hit. Tasks
    /// still running at the deadline are left to finish on their own; their
    /// results are dropped.
    async fn fan_out(
        &self,
        session: &Session,
        analysis: &StageContext,
        types: &[DiagramType],
        deadline: tokio::time::Instant,
        emitter: &EventEmitter,
    ) -> (Vec<DiagramTask>, bool) {
        let runnable: Vec<DiagramType> = types
            .iter()
            .copied()
            .filter(|t| self.config.enabled_types.contains(t))
            .collect();
        debug!(session_id = %session.id, runnable = runnable.len(), fan_out_limit = self.config.fan_out_limit, "fan_out: called");

        let permits = Arc::new(Semaphore::new(self.config.fan_out_limit.max(1)));
        let (tx, mut rx) = mpsc::channel(runnable.len().max(1));

        for diagram_type in runnable {
            let task = DiagramTask::new(
                session.id.clone(),
                diagram_type,
                &session.preferences,
                self.config.max_attempts,
            );
            let context = analysis.for_diagram(diagram_type);
            let orchestrator = self.tasks.clone();
            let permits = permits.clone();
            let emitter = emitter.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                // Never closed; a closed semaphore would only lift the bound
                let _permit = permits.acquire_owned().await.ok();
                let task = orchestrator.run(task, context, &emitter).await;
                // The receiver is gone once the session expired
                let _ = tx.send(task).await;
            });
        }
        drop(tx);

        let mut finished = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(task)) => finished.push(task),
                Ok(None) => return (finished, false),
                Err(_) => {
                    warn!(session_id = %session.id, finished = finished.len(), "Session deadline reached during fan-out");
                    return (finished, true);
                }
            }
        }
    }

    /// Order finished tasks by request and fill in the ones that never
    /// finished (disabled, cut off by expiry, or aborted)
    fn complete_tasks(
        &self,
        session: &Session,
        types: &[DiagramType],
        finished: Vec<DiagramTask>,
        expired: bool,
    ) -> Vec<DiagramTask> {
        let mut by_type: HashMap<DiagramType, DiagramTask> =
            finished.into_iter().map(|t| (t.diagram_type, t)).collect();

        types
            .iter()
            .map(|&diagram_type| {
                if let Some(task) = by_type.remove(&diagram_type) {
                    return task;
                }
                let mut task = DiagramTask::new(
                    session.id.clone(),
                    diagram_type,
                    &session.preferences,
                    self.config.max_attempts,
                );
                let reason = if !self.config.enabled_types.contains(&diagram_type) {
                    FailureReason::Permanent {
                        stage: StageKind::Generate(diagram_type).to_string(),
                        message: format!("diagram type {} is not enabled", diagram_type),
                    }
                } else if expired {
                    FailureReason::Expired
                } else {
                    // All senders dropped without a report: the task panicked
                    warn!(%diagram_type, "complete_tasks: task ended without reporting");
                    FailureReason::Permanent {
                        stage: "orchestrator".to_string(),
                        message: "task aborted".to_string(),
                    }
                };
                if let Err(e) = task.fail(reason) {
                    warn!(%diagram_type, error = %e, "complete_tasks: could not fail placeholder task");
                }
                task
            })
            .collect()
    }

    async fn expire(&self, session: &Session, emitter: &EventEmitter) {
        info!(session_id = %session.id, "Session expired");
        match self.registry.expire(&session.id).await {
            Ok(()) | Err(RegistryError::Expired(_)) => {}
            Err(e) => warn!(session_id = %session.id, error = %e, "Could not mark session expired"),
        }
        emitter.emit(PipelineEvent::SessionExpired {
            session_id: session.id.clone(),
        });
    }
}
