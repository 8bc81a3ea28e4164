//! diagramgen - quality-driven multi-stage Mermaid diagram generation
//!
//! A natural-language request is admitted into a session, analysed once,
//! then fanned out to one task per diagram type. Each task loops through
//! generation, evaluation and repair until its quality score clears the
//! threshold or its attempt budget runs out.

pub mod capability;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod executor;
pub mod health;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod validation;

pub use capability::{Capabilities, Capability, StageError, StageKind, StageOutput};
pub use config::Config;
pub use domain::{
    DiagramTask, DiagramType, Preferences, QualityReport, Session, SessionId, SessionResult, SessionStatus,
    StageContext, TaskStatus,
};
pub use events::{EventBus, PipelineEvent};
pub use executor::{RetryPolicy, StageExecutor};
pub use pipeline::{DiagramOrchestrator, SessionOrchestrator};
pub use registry::{RegistryError, SessionRegistry};
