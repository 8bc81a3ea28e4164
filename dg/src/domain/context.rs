//! Stage context: what earlier stages produced for one diagram task

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::diagram::DiagramType;
use super::quality::QualityReport;
use super::session::Preferences;

/// Accumulated prior-stage output for one diagram task
///
/// Stages read it; only the owning task orchestrator writes to it, and only
/// by recording new output. Request-level analyses are shared by `Arc`
/// between the tasks of a session.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    request: Arc<str>,
    preferences: Preferences,
    diagram_type: Option<DiagramType>,
    requirement_summary: Option<Arc<str>>,
    system_summary: Option<Arc<str>>,
    interaction_guidance: Option<Arc<str>>,
    latest_diagram: Option<String>,
    latest_report: Option<QualityReport>,
    repair_guidance: Vec<String>,
}

impl StageContext {
    /// Context for the request-level stages of a session
    pub fn for_request(request: impl Into<Arc<str>>, preferences: Preferences) -> Self {
        Self {
            request: request.into(),
            preferences,
            diagram_type: None,
            requirement_summary: None,
            system_summary: None,
            interaction_guidance: None,
            latest_diagram: None,
            latest_report: None,
            repair_guidance: Vec::new(),
        }
    }

    /// Fork a per-task context from the shared request-level one
    pub fn for_diagram(&self, diagram_type: DiagramType) -> Self {
        debug!(%diagram_type, "StageContext::for_diagram: called");
        Self {
            diagram_type: Some(diagram_type),
            latest_diagram: None,
            latest_report: None,
            repair_guidance: Vec::new(),
            ..self.clone()
        }
    }

    pub fn record_requirement(&mut self, summary: impl Into<Arc<str>>) {
        self.requirement_summary = Some(summary.into());
    }

    pub fn record_system(&mut self, summary: impl Into<Arc<str>>) {
        self.system_summary = Some(summary.into());
    }

    pub fn record_interaction(&mut self, guidance: impl Into<Arc<str>>) {
        self.interaction_guidance = Some(guidance.into());
    }

    pub fn record_diagram(&mut self, diagram: impl Into<String>) {
        self.latest_diagram = Some(diagram.into());
    }

    pub fn record_report(&mut self, report: QualityReport) {
        self.latest_report = Some(report);
    }

    /// Fold repair guidance in for the next generation call
    pub fn push_repair_guidance(&mut self, guidance: impl Into<String>) {
        self.repair_guidance.push(guidance.into());
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn diagram_type(&self) -> Option<DiagramType> {
        self.diagram_type
    }

    pub fn requirement_summary(&self) -> Option<&str> {
        self.requirement_summary.as_deref()
    }

    pub fn system_summary(&self) -> Option<&str> {
        self.system_summary.as_deref()
    }

    pub fn interaction_guidance(&self) -> Option<&str> {
        self.interaction_guidance.as_deref()
    }

    pub fn latest_diagram(&self) -> Option<&str> {
        self.latest_diagram.as_deref()
    }

    pub fn latest_report(&self) -> Option<&QualityReport> {
        self.latest_report.as_ref()
    }

    pub fn repair_guidance(&self) -> &[String] {
        &self.repair_guidance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_shares_request_level_output() {
        let mut shared = StageContext::for_request("library system", Preferences::default());
        shared.record_requirement("needs: books, members, loans");
        shared.record_system("entities: Book, Member, Loan");

        let mut a = shared.for_diagram(DiagramType::ErDiagram);
        let b = shared.for_diagram(DiagramType::Flowchart);

        a.record_diagram("erDiagram\n BOOK ||--o{ LOAN : has");
        a.push_repair_guidance("add member attributes");

        assert_eq!(a.diagram_type(), Some(DiagramType::ErDiagram));
        assert_eq!(b.diagram_type(), Some(DiagramType::Flowchart));
        assert_eq!(b.requirement_summary(), Some("needs: books, members, loans"));
        assert_eq!(b.system_summary(), Some("entities: Book, Member, Loan"));
        // Siblings never see each other's output
        assert!(b.latest_diagram().is_none());
        assert!(b.repair_guidance().is_empty());
        assert_eq!(a.repair_guidance().len(), 1);
    }

    #[test]
    fn test_serializes_shared_summaries_for_prompts() {
        let mut shared = StageContext::for_request("library system", Preferences::default());
        shared.record_requirement("needs: loans");
        let ctx = shared.for_diagram(DiagramType::Flowchart);

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["request"], "library system");
        assert_eq!(value["requirement_summary"], "needs: loans");
        assert!(value["system_summary"].is_null());
        assert_eq!(value["diagram_type"], "flowchart");
    }
}
