//! Session registry with actor pattern
//!
//! SessionRegistry owns the process-wide admission table and processes
//! messages via a channel, which keeps the concurrency cap exact under
//! concurrent admissions.

mod manager;
mod messages;

pub use manager::SessionRegistry;
pub use messages::{RegistryCommand, RegistryError, RegistryResponse, RegistryStats, SessionReport};
