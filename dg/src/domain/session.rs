//! Sessions: one admitted user request and its lifecycle status

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diagram::{Complexity, DetailLevel};

/// Opaque session identifier
///
/// Format: `ses-{uuid-v7}`; v7 keeps identifiers sortable by admission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh identifier
    pub fn generate() -> Self {
        Self(format!("ses-{}", uuid::Uuid::now_v7()))
    }

    /// Wrap an existing identifier string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters of the uuid portion, for log lines
    pub fn short(&self) -> &str {
        let uuid = self.0.strip_prefix("ses-").unwrap_or(&self.0);
        uuid.get(..8).unwrap_or(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Pending and running sessions hold a concurrency slot
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Valid lifecycle transitions
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Running)
                | (SessionStatus::Pending, SessionStatus::Expired)
                | (SessionStatus::Running, SessionStatus::Completed)
                | (SessionStatus::Running, SessionStatus::Failed)
                | (SessionStatus::Running, SessionStatus::Expired)
                | (SessionStatus::Pending, SessionStatus::Cancelled)
                | (SessionStatus::Running, SessionStatus::Cancelled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User preferences that shape generation and the quality loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub complexity: Complexity,
    pub detail_level: DetailLevel,
    /// Minimum aggregate score (0..=100) accepted without repair
    pub quality_threshold: f64,
    /// Repair sub-threshold diagrams automatically
    pub auto_fix: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            complexity: Complexity::default(),
            detail_level: DetailLevel::default(),
            quality_threshold: 75.0,
            auto_fix: true,
        }
    }
}

impl Preferences {
    /// Defaults with the configured threshold
    pub fn with_threshold(quality_threshold: f64) -> Self {
        Self {
            quality_threshold,
            ..Default::default()
        }
    }
}

/// One admitted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub request: String,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(request: impl Into<String>, preferences: Preferences) -> Self {
        Self {
            id: SessionId::generate(),
            request: request.into(),
            preferences,
            created_at: Utc::now(),
            status: SessionStatus::Pending,
        }
    }

    /// Age of the session in whole milliseconds
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds()
    }
}
