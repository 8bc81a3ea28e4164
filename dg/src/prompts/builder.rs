//! Handlebars prompt builder

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::{PromptBuilder, embedded};
use crate::capability::StageKind;
use crate::domain::{DiagramType, StageContext};

/// Values a template may reference
#[derive(Debug, Clone, Serialize)]
pub struct PromptData<'a> {
    pub request: &'a str,
    pub complexity: &'static str,
    pub detail_level: &'static str,
    pub quality_threshold: f64,
    pub min_elements: usize,
    pub diagram_type: Option<&'static str>,
    pub diagram_name: Option<&'static str>,
    pub diagram_guidance: Option<&'static str>,
    pub mermaid_header: Option<&'static str>,
    pub requirement_summary: Option<&'a str>,
    pub system_summary: Option<&'a str>,
    pub interaction_guidance: Option<&'a str>,
    pub previous_diagram: Option<&'a str>,
    pub repair_guidance: &'a [String],
}

impl<'a> PromptData<'a> {
    pub fn new(stage: StageKind, context: &'a StageContext) -> Self {
        let preferences = context.preferences();
        let diagram_type: Option<DiagramType> = stage.diagram_type().or(context.diagram_type());
        Self {
            request: context.request(),
            complexity: preferences.complexity.as_str(),
            detail_level: preferences.detail_level.as_str(),
            quality_threshold: preferences.quality_threshold,
            min_elements: preferences.complexity.min_elements(),
            diagram_type: diagram_type.map(|t| t.as_str()),
            diagram_name: diagram_type.map(|t| t.display_name()),
            diagram_guidance: diagram_type.map(|t| t.guidance()),
            mermaid_header: diagram_type.and_then(|t| t.mermaid_headers().first().copied()),
            requirement_summary: context.requirement_summary(),
            system_summary: context.system_summary(),
            interaction_guidance: context.interaction_guidance(),
            previous_diagram: context.latest_diagram(),
            repair_guidance: context.repair_guidance(),
        }
    }
}

/// Renders `.pmt` templates, preferring `{user_dir}/{name}.pmt` over the
/// embedded copy
pub struct HandlebarsPromptBuilder {
    hbs: Handlebars<'static>,
    user_dir: Option<PathBuf>,
}

impl HandlebarsPromptBuilder {
    pub fn new(user_dir: Option<&Path>) -> Self {
        debug!(?user_dir, "HandlebarsPromptBuilder::new: called");
        let user_dir = user_dir.filter(|d| d.is_dir()).map(Path::to_path_buf);
        if user_dir.is_none() {
            debug!("HandlebarsPromptBuilder::new: no user override directory");
        }
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs, user_dir }
    }

    /// Builder that only uses embedded prompts
    pub fn embedded_only() -> Self {
        Self::new(None)
    }

    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "load_template: found in user override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read user prompt {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }
}

impl PromptBuilder for HandlebarsPromptBuilder {
    fn build(&self, stage: StageKind, context: &StageContext) -> Result<String> {
        debug!(%stage, "build: called");
        let template = self.load_template(stage.name())?;
        let data = PromptData::new(stage, context);
        self.hbs
            .render_template(&template, &data)
            .map_err(|e| eyre!("Failed to render template {}: {}", stage.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Complexity, Preferences};

    fn context() -> StageContext {
        let prefs = Preferences {
            complexity: Complexity::Complex,
            ..Preferences::with_threshold(80.0)
        };
        let mut ctx = StageContext::for_request("An online bookstore with <orders> & payments", prefs);
        ctx.record_requirement("Customers browse and buy books");
        ctx.record_system("Catalog, Cart and Payment services");
        ctx
    }

    #[test]
    fn test_generate_prompt_carries_context() {
        let builder = HandlebarsPromptBuilder::embedded_only();
        let ctx = context().for_diagram(DiagramType::Sequence);
        let prompt = builder.build(StageKind::Generate(DiagramType::Sequence), &ctx).unwrap();

        assert!(prompt.starts_with("Draw a Sequence Diagram in Mermaid syntax"));
        assert!(prompt.contains("Start the code with `sequenceDiagram`"));
        assert!(prompt.contains("at least 10 elements"));
        assert!(prompt.contains("Catalog, Cart and Payment services"));
        // Not HTML-escaped
        assert!(prompt.contains("<orders> & payments"));
    }

    #[test]
    fn test_repair_prompt_includes_previous_diagram_and_guidance() {
        let builder = HandlebarsPromptBuilder::embedded_only();
        let mut ctx = context().for_diagram(DiagramType::Flowchart);
        ctx.record_diagram("flowchart TD\n  A --> B");
        ctx.push_repair_guidance("The previous diagram scored 60.0 (fair).");

        let prompt = builder.build(StageKind::Repair(DiagramType::Flowchart), &ctx).unwrap();
        assert!(prompt.contains("required quality score of 80"));
        assert!(prompt.contains("flowchart TD\n  A --> B"));
        assert!(prompt.contains("The previous diagram scored 60.0 (fair)."));
    }

    #[test]
    fn test_analysis_prompt_omits_missing_sections() {
        let builder = HandlebarsPromptBuilder::embedded_only();
        let ctx = StageContext::for_request("A to-do app", Preferences::default());
        let prompt = builder.build(StageKind::System, &ctx).unwrap();
        assert!(prompt.contains("A to-do app"));
        assert!(!prompt.contains("Requirement analysis:"));
    }

    #[test]
    fn test_user_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirement.pmt"), "custom: {{request}}").unwrap();

        let builder = HandlebarsPromptBuilder::new(Some(dir.path()));
        let ctx = StageContext::for_request("A to-do app", Preferences::default());
        assert_eq!(builder.build(StageKind::Requirement, &ctx).unwrap(), "custom: A to-do app");

        // Templates without an override still come from the embedded set
        let system = builder.build(StageKind::System, &ctx).unwrap();
        assert!(system.contains("Use stable, short English identifiers"));
    }
}
