//! LLM-backed stage implementations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Capabilities, Capability, StageError, StageKind, StageOutput};
use crate::config::Config;
use crate::domain::{QualityDimension, StageContext};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::prompts::PromptBuilder;
use crate::validation::{SyntaxValidator, extract_mermaid};

const SYSTEM_PROMPT: &str = "You are an expert software architect. You analyze requirements carefully and draw \
clear, correct diagrams in Mermaid syntax.";

const GENERATE_TEMPERATURE: f32 = 0.3;
const REPAIR_TEMPERATURE: f32 = 0.1;
const REVIEW_TEMPERATURE: f32 = 0.2;
const REVIEW_MAX_TOKENS: u32 = 1000;

/// Render the stage prompt and run one completion
async fn complete(
    client: &dyn LlmClient,
    prompts: &dyn PromptBuilder,
    stage: StageKind,
    context: &StageContext,
    max_tokens: u32,
    temperature: Option<f32>,
) -> Result<String, StageError> {
    let prompt = prompts
        .build(stage, context)
        .map_err(|e| StageError::permanent(format!("prompt for {}: {}", stage, e)))?;
    debug!(%stage, prompt_len = prompt.len(), "complete: sending");

    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens,
        temperature,
    };
    let response = client.complete(request).await?;
    debug!(%stage, tokens = response.usage.total(), "complete: received");

    response
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| StageError::permanent(format!("{} stage got an empty response", stage)))
}

/// Requirement analysis, system analysis and interaction guidance
pub struct AnalysisStage {
    client: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptBuilder>,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl AnalysisStage {
    pub fn new(
        client: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptBuilder>,
        max_tokens: u32,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            client,
            prompts,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl Capability for AnalysisStage {
    async fn process(&self, stage: StageKind, context: &StageContext) -> Result<StageOutput, StageError> {
        debug!(%stage, "AnalysisStage::process: called");
        match stage {
            StageKind::Requirement | StageKind::System | StageKind::Interaction => {}
            other => return Err(StageError::permanent(format!("analysis cannot run {}", other))),
        }
        let text = complete(
            self.client.as_ref(),
            self.prompts.as_ref(),
            stage,
            context,
            self.max_tokens,
            self.temperature,
        )
        .await?;
        Ok(StageOutput::Text(text))
    }
}

/// Diagram generation in normal and repair mode
pub struct GenerationStage {
    client: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptBuilder>,
    max_tokens: u32,
}

impl GenerationStage {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<dyn PromptBuilder>, max_tokens: u32) -> Self {
        Self {
            client,
            prompts,
            max_tokens,
        }
    }
}

#[async_trait]
impl Capability for GenerationStage {
    async fn process(&self, stage: StageKind, context: &StageContext) -> Result<StageOutput, StageError> {
        debug!(%stage, "GenerationStage::process: called");
        let temperature = match stage {
            StageKind::Generate(_) => GENERATE_TEMPERATURE,
            StageKind::Repair(_) => REPAIR_TEMPERATURE,
            other => return Err(StageError::permanent(format!("generation cannot run {}", other))),
        };
        let text = complete(
            self.client.as_ref(),
            self.prompts.as_ref(),
            stage,
            context,
            self.max_tokens,
            Some(temperature),
        )
        .await?;
        // An empty extraction still goes to evaluation, which scores it zero
        Ok(StageOutput::Diagram(extract_mermaid(&text)))
    }
}

/// Model review of completeness and accuracy
pub struct Review {
    client: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptBuilder>,
}

impl Review {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<dyn PromptBuilder>) -> Self {
        Self { client, prompts }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReviewScores {
    completeness_score: Option<f64>,
    missing_elements: Vec<String>,
    accuracy_score: Option<f64>,
    accuracy_issues: Vec<String>,
}

/// Parse the review JSON, tolerating surrounding prose and fences
fn parse_review(text: &str) -> Option<ReviewScores> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let scores: ReviewScores = serde_json::from_str(&text[start..=end]).ok()?;
    if scores.completeness_score.is_none() && scores.accuracy_score.is_none() {
        return None;
    }
    Some(scores)
}

/// Quality evaluation: validator heuristics, optionally refined by review
pub struct EvaluationStage {
    validator: Arc<dyn SyntaxValidator>,
    review: Option<Review>,
}

impl EvaluationStage {
    pub fn new(validator: Arc<dyn SyntaxValidator>, review: Option<Review>) -> Self {
        Self { validator, review }
    }
}

#[async_trait]
impl Capability for EvaluationStage {
    async fn process(&self, stage: StageKind, context: &StageContext) -> Result<StageOutput, StageError> {
        debug!(%stage, "EvaluationStage::process: called");
        if stage != StageKind::Evaluate {
            return Err(StageError::permanent(format!("evaluation cannot run {}", stage)));
        }
        let diagram_type = context
            .diagram_type()
            .ok_or_else(|| StageError::permanent("evaluation needs a diagram task context"))?;
        let code = context
            .latest_diagram()
            .ok_or_else(|| StageError::permanent("no diagram to evaluate"))?;

        let mut report = self
            .validator
            .evaluate(diagram_type, context.preferences().complexity, code);

        let Some(review) = &self.review else {
            return Ok(StageOutput::Report(report));
        };
        if code.trim().is_empty() {
            return Ok(StageOutput::Report(report));
        }

        let reply = complete(
            review.client.as_ref(),
            review.prompts.as_ref(),
            stage,
            context,
            REVIEW_MAX_TOKENS,
            Some(REVIEW_TEMPERATURE),
        )
        .await;

        match reply {
            Ok(text) => match parse_review(&text) {
                Some(scores) => {
                    if let Some(score) = scores.completeness_score {
                        let missing = scores
                            .missing_elements
                            .into_iter()
                            .map(|m| format!("missing: {}", m))
                            .collect();
                        report = self
                            .validator
                            .revise(&report, QualityDimension::LogicalCompleteness, score, missing);
                    }
                    if let Some(score) = scores.accuracy_score {
                        report = self.validator.revise(
                            &report,
                            QualityDimension::InformationAccuracy,
                            score,
                            scores.accuracy_issues,
                        );
                    }
                }
                None => warn!(%diagram_type, "Unparseable quality review, keeping heuristic scores"),
            },
            // Let the executor retry service hiccups
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => warn!(%diagram_type, error = %e, "Quality review failed, keeping heuristic scores"),
        }

        Ok(StageOutput::Report(report))
    }
}

impl Capabilities {
    /// The standard LLM-backed stage set
    pub fn llm(
        client: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptBuilder>,
        validator: Arc<dyn SyntaxValidator>,
        config: &Config,
    ) -> Self {
        debug!(
            llm_review = config.quality.llm_review,
            interaction = config.pipeline.interaction_optimization,
            "Capabilities::llm: called"
        );
        let max_tokens = config.llm.max_tokens;
        let analysis: Arc<dyn Capability> = Arc::new(AnalysisStage::new(
            client.clone(),
            prompts.clone(),
            max_tokens,
            Some(config.llm.temperature),
        ));
        let review = config
            .quality
            .llm_review
            .then(|| Review::new(client.clone(), prompts.clone()));

        Capabilities {
            requirement: analysis.clone(),
            system: analysis.clone(),
            generator: Arc::new(GenerationStage::new(client, prompts, max_tokens)),
            evaluator: Arc::new(EvaluationStage::new(validator, review)),
            interaction: config.pipeline.interaction_optimization.then_some(analysis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiagramType, Preferences};
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, LlmError};
    use crate::prompts::HandlebarsPromptBuilder;
    use crate::validation::MermaidValidator;

    const DIAGRAM: &str = "flowchart TD\n  A[Browse] --> B[Cart]\n  B --> C[Pay]";

    fn prompts() -> Arc<dyn PromptBuilder> {
        Arc::new(HandlebarsPromptBuilder::embedded_only())
    }

    fn diagram_context() -> StageContext {
        let mut ctx = StageContext::for_request("bookstore", Preferences::default()).for_diagram(DiagramType::Flowchart);
        ctx.record_diagram(DIAGRAM);
        ctx
    }

    #[tokio::test]
    async fn test_analysis_returns_trimmed_text() {
        let client = Arc::new(MockLlmClient::with_texts(&["  Customers buy books.  "]));
        let stage = AnalysisStage::new(client.clone(), prompts(), 500, Some(0.7));
        let ctx = StageContext::for_request("bookstore", Preferences::default());

        let out = stage.process(StageKind::Requirement, &ctx).await.unwrap();
        assert_eq!(out, StageOutput::Text("Customers buy books.".into()));

        let requests = client.requests();
        assert_eq!(requests[0].temperature, Some(0.7));
        assert!(requests[0].messages[0].content.contains("bookstore"));
    }

    #[tokio::test]
    async fn test_generation_extracts_code_and_picks_temperature() {
        let client = Arc::new(MockLlmClient::with_texts(&[
            "Here:\n```mermaid\nflowchart TD\n  A --> B\n```",
            "```mermaid\nflowchart LR\n  A --> C\n```",
        ]));
        let stage = GenerationStage::new(client.clone(), prompts(), 2000);
        let ctx = diagram_context();

        let first = stage.process(StageKind::Generate(DiagramType::Flowchart), &ctx).await.unwrap();
        assert_eq!(first, StageOutput::Diagram("flowchart TD\n  A --> B".into()));
        let second = stage.process(StageKind::Repair(DiagramType::Flowchart), &ctx).await.unwrap();
        assert_eq!(second, StageOutput::Diagram("flowchart LR\n  A --> C".into()));

        let requests = client.requests();
        assert_eq!(requests[0].temperature, Some(GENERATE_TEMPERATURE));
        assert_eq!(requests[1].temperature, Some(REPAIR_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_llm_errors_become_stage_errors() {
        let client = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::ApiError {
                status: 503,
                message: "busy".into(),
            }),
            Err(LlmError::ApiError {
                status: 400,
                message: "bad request".into(),
            }),
        ]));
        let stage = GenerationStage::new(client, prompts(), 2000);
        let ctx = diagram_context();

        let err = stage.process(StageKind::Generate(DiagramType::Flowchart), &ctx).await.unwrap_err();
        assert!(err.is_transient());
        let err = stage.process(StageKind::Generate(DiagramType::Flowchart), &ctx).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_wrong_stage_is_permanent() {
        let client = Arc::new(MockLlmClient::with_texts(&[]));
        let stage = GenerationStage::new(client.clone(), prompts(), 2000);
        let err = stage.process(StageKind::Evaluate, &diagram_context()).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_evaluation_without_review_is_heuristic_only() {
        let validator = Arc::new(MermaidValidator::default());
        let stage = EvaluationStage::new(validator.clone(), None);
        let ctx = diagram_context();

        let report = stage.process(StageKind::Evaluate, &ctx).await.unwrap().into_report(StageKind::Evaluate).unwrap();
        let expected = validator.evaluate(DiagramType::Flowchart, ctx.preferences().complexity, DIAGRAM);
        assert_eq!(report, expected);
    }

    #[tokio::test]
    async fn test_evaluation_applies_review_scores() {
        let client = Arc::new(MockLlmClient::with_texts(&[
            r#"```json
{"completeness_score": 40, "missing_elements": ["shipping"], "accuracy_score": 90, "accuracy_issues": []}
```"#,
        ]));
        let validator = Arc::new(MermaidValidator::default());
        let stage = EvaluationStage::new(validator, Some(Review::new(client.clone(), prompts())));

        let report = stage
            .process(StageKind::Evaluate, &diagram_context())
            .await
            .unwrap()
            .into_report(StageKind::Evaluate)
            .unwrap();
        assert_eq!(report.scores().logical_completeness, 40.0);
        assert_eq!(report.scores().information_accuracy, 90.0);
        assert!(report.issues().iter().any(|i| i.message == "missing: shipping"));
        assert_eq!(client.requests()[0].temperature, Some(REVIEW_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_evaluation_falls_back_on_unparseable_review() {
        let client = Arc::new(MockLlmClient::with_texts(&["I think it looks fine."]));
        let validator = Arc::new(MermaidValidator::default());
        let stage = EvaluationStage::new(validator.clone(), Some(Review::new(client, prompts())));
        let ctx = diagram_context();

        let report = stage.process(StageKind::Evaluate, &ctx).await.unwrap().into_report(StageKind::Evaluate).unwrap();
        assert_eq!(report, validator.evaluate(DiagramType::Flowchart, ctx.preferences().complexity, DIAGRAM));
    }

    #[tokio::test]
    async fn test_evaluation_propagates_transient_review_failure() {
        let client = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::Timeout(
            std::time::Duration::from_secs(1),
        ))]));
        let stage = EvaluationStage::new(
            Arc::new(MermaidValidator::default()),
            Some(Review::new(client, prompts())),
        );
        let err = stage.process(StageKind::Evaluate, &diagram_context()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_review_requires_a_score() {
        assert!(parse_review("{}").is_none());
        assert!(parse_review("no json here").is_none());
        let parsed = parse_review(r#"Sure! {"accuracy_score": 70.5}"#).unwrap();
        assert_eq!(parsed.accuracy_score, Some(70.5));
        assert!(parsed.completeness_score.is_none());
    }

    #[test]
    fn test_llm_capabilities_follow_config() {
        let client: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![CompletionResponse::text("x")]));
        let validator: Arc<dyn SyntaxValidator> = Arc::new(MermaidValidator::default());

        let mut config = Config::default();
        let caps = Capabilities::llm(client.clone(), prompts(), validator.clone(), &config);
        assert!(caps.interaction.is_some());

        config.pipeline.interaction_optimization = false;
        let caps = Capabilities::llm(client, prompts(), validator, &config);
        assert!(caps.interaction.is_none());
    }
}
