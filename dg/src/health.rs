//! Health check: one tiny completion plus registry occupancy

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, LlmClient};
use crate::registry::{RegistryError, RegistryStats, SessionRegistry};

/// Token budget for the connectivity completion
pub const HEALTH_MAX_TOKENS: u32 = 10;

const HEALTH_PROMPT: &str = "Reply with OK.";

/// Outcome of the connectivity completion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ApiStatus {
    /// Service answered with content
    Healthy,
    /// Service answered without content
    Unhealthy,
    /// No usable answer
    Error { message: String },
}

impl ApiStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ApiStatus::Healthy)
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiStatus::Healthy => write!(f, "healthy"),
            ApiStatus::Unhealthy => write!(f, "unhealthy"),
            ApiStatus::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Combined health of the completion service and the registry
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub api_status: ApiStatus,
    pub model: Option<String>,
    pub active_sessions: usize,
    pub max_concurrent_sessions: usize,
    /// `healthy` below capacity, `busy` at it
    pub system_status: &'static str,
    pub success_rate: f64,
    pub avg_processing_secs: f64,
}

impl HealthReport {
    pub fn new(api_status: ApiStatus, model: Option<String>, stats: &RegistryStats) -> Self {
        Self {
            api_status,
            model,
            active_sessions: stats.active(),
            max_concurrent_sessions: stats.capacity,
            system_status: stats.system_status(),
            success_rate: stats.success_rate,
            avg_processing_secs: stats.avg_processing_secs,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.api_status.is_healthy()
    }
}

/// Send one minimal completion; a single attempt, no retries
pub async fn ping_api(client: &dyn LlmClient) -> ApiStatus {
    debug!(model = %client.model(), "ping_api: called");
    let request = CompletionRequest::prompt(HEALTH_PROMPT, HEALTH_MAX_TOKENS, None);
    match client.complete(request).await {
        Ok(response) if response.content.as_deref().is_some_and(|c| !c.trim().is_empty()) => {
            info!(model = %client.model(), "Completion service healthy");
            ApiStatus::Healthy
        }
        Ok(_) => {
            warn!(model = %client.model(), "Completion service answered without content");
            ApiStatus::Unhealthy
        }
        Err(e) => {
            warn!(model = %client.model(), error = %e, "Completion service check failed");
            ApiStatus::Error { message: e.to_string() }
        }
    }
}

/// Ping the completion service and read the registry counters
pub async fn check(client: &dyn LlmClient, registry: &SessionRegistry) -> Result<HealthReport, RegistryError> {
    debug!("check: called");
    let api_status = ping_api(client).await;
    let stats = registry.stats().await?;
    Ok(HealthReport::new(api_status, Some(client.model().to_string()), &stats))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::Preferences;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, LlmError};

    #[tokio::test]
    async fn test_healthy_service_and_registry_occupancy() {
        let client = MockLlmClient::with_texts(&["OK"]);
        let registry = SessionRegistry::spawn(2, Duration::from_secs(60));
        registry.admit("x", Preferences::default()).await.unwrap();

        let report = check(&client, &registry).await.unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.model.as_deref(), Some("mock"));
        assert_eq!(report.active_sessions, 1);
        assert_eq!(report.max_concurrent_sessions, 2);
        assert_eq!(report.system_status, "healthy");

        let sent = client.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].max_tokens, HEALTH_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_registry_at_capacity_is_busy() {
        let client = MockLlmClient::with_texts(&["OK"]);
        let registry = SessionRegistry::spawn(1, Duration::from_secs(60));
        registry.admit("x", Preferences::default()).await.unwrap();

        let report = check(&client, &registry).await.unwrap();
        assert_eq!(report.system_status, "busy");
    }

    #[tokio::test]
    async fn test_service_errors_are_reported_not_raised() {
        let client = MockLlmClient::scripted(vec![Err(LlmError::ApiError {
            status: 401,
            message: "bad key".to_string(),
        })]);
        let status = ping_api(&client).await;
        assert!(!status.is_healthy());
        assert!(status.to_string().starts_with("error: "));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_content_is_unhealthy() {
        let client = MockLlmClient::new(vec![CompletionResponse::text("  ")]);
        assert_eq!(ping_api(&client).await, ApiStatus::Unhealthy);
    }

    #[test]
    fn test_report_serializes_status_tag() {
        let report = HealthReport::new(
            ApiStatus::Error {
                message: "no key".to_string(),
            },
            None,
            &RegistryStats {
                capacity: 3,
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["api_status"]["state"], "error");
        assert_eq!(value["max_concurrent_sessions"], 3);
        assert_eq!(value["system_status"], "healthy");
    }
}
