//! Event bus: fire-and-forget broadcast of pipeline progress

use tokio::sync::broadcast;
use tracing::debug;

use super::types::PipelineEvent;
use crate::domain::{DiagramType, SessionId, TaskStatus};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus for pipeline events
///
/// Emitting never blocks and never fails: with no subscribers events are
/// dropped, and a lagging subscriber loses the oldest ones.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn emit(&self, event: PipelineEvent) {
        debug!(
            event_type = event.event_type(),
            session_id = %event.session_id(),
            "EventBus::emit"
        );
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Emitter bound to one session
    pub fn emitter_for(&self, session_id: &SessionId) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            session_id: session_id.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Session-scoped handle for emitting events
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PipelineEvent>,
    session_id: SessionId,
}

impl EventEmitter {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn emit(&self, event: PipelineEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn task_state_changed(&self, diagram_type: DiagramType, from: TaskStatus, to: TaskStatus, attempt: u32) {
        self.emit(PipelineEvent::TaskStateChanged {
            session_id: self.session_id.clone(),
            diagram_type,
            from,
            to,
            attempt,
        });
    }

    pub fn task_evaluated(&self, diagram_type: DiagramType, attempt: u32, score: f64) {
        self.emit(PipelineEvent::TaskEvaluated {
            session_id: self.session_id.clone(),
            diagram_type,
            attempt,
            score,
        });
    }

    pub fn stage_retry(&self, stage: &str, retry: u32, delay_ms: u64, error: &str) {
        self.emit(PipelineEvent::StageRetry {
            session_id: self.session_id.clone(),
            stage: stage.to_string(),
            retry,
            delay_ms,
            error: error.to_string(),
        });
    }
}
