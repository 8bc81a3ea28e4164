//! Progress events
//!
//! Orchestrators emit `PipelineEvent`s on a tokio broadcast channel; the CLI
//! subscribes to print progress. Emission is fire-and-forget and never
//! affects the pipeline's outcome.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use types::PipelineEvent;
