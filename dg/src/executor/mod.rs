//! Stage executor
//!
//! Invokes one capability, retrying transient failures with backoff.
//! Quality-driven regeneration is the task orchestrator's business; the
//! executor only ever sees one stage call at a time.

mod retry;

pub use retry::RetryPolicy;

use thiserror::Error;
use tracing::{debug, warn};

use crate::capability::{Capabilities, StageError, StageKind, StageOutput};
use crate::domain::{FailureReason, StageContext};
use crate::events::EventEmitter;

/// A stage that could not produce output
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{stage} failed after {retries} retries: {error}")]
pub struct ExecutionError {
    pub stage: StageKind,
    pub error: StageError,
    /// Retries spent before giving up (0 for permanent errors)
    pub retries: u32,
}

impl ExecutionError {
    /// How the owning task records this failure
    pub fn failure_reason(&self) -> FailureReason {
        match &self.error {
            StageError::Transient { message, .. } => FailureReason::Infrastructure {
                stage: self.stage.to_string(),
                message: message.clone(),
                retries: self.retries,
            },
            StageError::Permanent(message) => FailureReason::Permanent {
                stage: self.stage.to_string(),
                message: message.clone(),
            },
        }
    }
}

/// Runs stages through the capability table under a retry policy
#[derive(Clone, Debug)]
pub struct StageExecutor {
    capabilities: Capabilities,
    policy: RetryPolicy,
}

impl StageExecutor {
    pub fn new(capabilities: Capabilities, policy: RetryPolicy) -> Self {
        Self { capabilities, policy }
    }

    pub fn has_capability(&self, stage: StageKind) -> bool {
        self.capabilities.for_stage(stage).is_some()
    }

    /// Invoke `stage`, retrying transient errors up to the policy's budget
    pub async fn execute(
        &self,
        stage: StageKind,
        context: &StageContext,
        events: &EventEmitter,
    ) -> Result<StageOutput, ExecutionError> {
        debug!(%stage, session_id = %events.session_id(), "execute: called");
        let Some(capability) = self.capabilities.for_stage(stage) else {
            return Err(ExecutionError {
                stage,
                error: StageError::permanent(format!("no capability registered for {}", stage)),
                retries: 0,
            });
        };

        let mut retries = 0;
        loop {
            match capability.process(stage, context).await {
                Ok(output) => {
                    debug!(%stage, retries, "execute: succeeded");
                    return Ok(output);
                }
                Err(error) if error.is_transient() && retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.delay_for(retries, error.retry_after());
                    warn!(
                        %stage,
                        retry = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient stage failure, retrying"
                    );
                    events.stage_retry(&stage.to_string(), retries, delay.as_millis() as u64, error.message());
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    debug!(%stage, retries, transient = error.is_transient(), "execute: giving up");
                    return Err(ExecutionError { stage, error, retries });
                }
            }
        }
    }
}
