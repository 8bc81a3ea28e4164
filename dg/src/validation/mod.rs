//! Diagram validation
//!
//! `SyntaxValidator` is the seam the evaluation stage scores through;
//! `MermaidValidator` is the rule-based implementation.

mod extract;
mod mermaid;

pub use extract::extract_mermaid;
pub use mermaid::MermaidValidator;

use crate::domain::{Complexity, DiagramType, QualityDimension, QualityReport};

/// Scores diagram text and turns reports into repair guidance
pub trait SyntaxValidator: Send + Sync {
    /// Evaluate diagram code; the same input always yields the same report
    fn evaluate(&self, diagram_type: DiagramType, complexity: Complexity, code: &str) -> QualityReport;

    /// New report with one dimension re-scored by an outside reviewer
    fn revise(
        &self,
        report: &QualityReport,
        dimension: QualityDimension,
        score: f64,
        findings: Vec<String>,
    ) -> QualityReport;

    /// Render a report's issues and suggestions as guidance for regeneration
    fn repair_hint(&self, report: &QualityReport) -> String;
}

/// Compile a built-in pattern, logging an error if it is broken
///
/// Callers treat `None` as the feature being unavailable.
pub(crate) fn compile_pattern(name: &str, pattern: &str) -> Option<regex::Regex> {
    regex::Regex::new(pattern)
        .map_err(|e| tracing::error!(name, error = %e, "Built-in pattern failed to compile"))
        .ok()
}
