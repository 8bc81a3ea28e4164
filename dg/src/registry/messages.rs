//! Session registry messages
//!
//! Commands and responses for the actor pattern.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Preferences, Session, SessionId, SessionStatus};

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Capacity exceeded: {active} of {max} session slots in use")]
    CapacityExceeded { active: usize, max: usize },

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Invalid transition {from} -> {to} for session {id}")]
    InvalidTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session expired: {0}")]
    Expired(SessionId),

    #[error("Session cancelled: {0}")]
    Cancelled(SessionId),

    #[error("Channel error")]
    ChannelError,
}

/// Response from registry operations
pub type RegistryResponse<T> = Result<T, RegistryError>;

/// One session as the registry sees it
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    #[serde(flatten)]
    pub session: Session,
    /// Admission to finish, or to now while the session is active
    pub processing_secs: f64,
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    /// Sessions admitted but not yet started
    pub pending: usize,
    /// Sessions currently running
    pub running: usize,
    /// Configured slot limit
    pub capacity: usize,
    /// Entries still held, including finished ones awaiting retirement
    pub tracked: usize,

    // Lifetime counters
    pub admitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    pub cancelled: u64,

    /// Completed share of every session that reached a terminal status
    pub success_rate: f64,
    /// Mean admission-to-finish time of terminal sessions
    pub avg_processing_secs: f64,
}

impl RegistryStats {
    /// Sessions holding a concurrency slot
    pub fn active(&self) -> usize {
        self.pending + self.running
    }

    /// Sessions that reached any terminal status
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.expired + self.cancelled
    }

    /// `busy` once every slot is taken
    pub fn system_status(&self) -> &'static str {
        if self.active() < self.capacity {
            "healthy"
        } else {
            "busy"
        }
    }
}

/// Commands sent to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    Admit {
        request: String,
        preferences: Preferences,
        reply: oneshot::Sender<RegistryResponse<SessionId>>,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<Session>>,
    },
    /// `pending -> running`
    Start {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<Session>>,
    },
    /// `running -> completed | failed`
    Finish {
        id: SessionId,
        status: SessionStatus,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    /// Mark one session expired now
    Expire {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    /// `pending | running -> cancelled`
    Cancel {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<SessionReport>>,
    },
    Report {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<SessionReport>>,
    },
    Retire {
        id: SessionId,
        reply: oneshot::Sender<RegistryResponse<Session>>,
    },
    ExpireIdle {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}
