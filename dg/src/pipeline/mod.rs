//! Pipeline orchestration
//!
//! - `DiagramOrchestrator` drives one diagram task's quality loop
//! - `SessionOrchestrator` fans a session out to diagram tasks
//! - `aggregate` folds terminal tasks into a `SessionResult`

mod aggregate;
mod session;
mod task;

pub use aggregate::{aggregate, outcome_kind};
pub use session::SessionOrchestrator;
pub use task::DiagramOrchestrator;
