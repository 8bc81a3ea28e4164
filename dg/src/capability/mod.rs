//! Stage capabilities
//!
//! Every pipeline stage implements one contract,
//! `process(stage, context) -> output`. The orchestrators only see this
//! trait and the `StageKind` tag; which implementation answers a stage is
//! decided by the `Capabilities` table.

mod error;
mod stages;

pub use error::StageError;
pub use stages::{AnalysisStage, EvaluationStage, GenerationStage, Review};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DiagramType, QualityReport, StageContext};

/// Which stage is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Request-level requirement analysis (once per session)
    Requirement,
    /// Request-level system analysis (once per session)
    System,
    /// User guidance derived from the analyses (optional, once per session)
    Interaction,
    /// First generation of one diagram
    Generate(DiagramType),
    /// Score the latest diagram in the context
    Evaluate,
    /// Regenerate with repair guidance
    Repair(DiagramType),
}

impl StageKind {
    /// Stable name, also the prompt template name
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Requirement => "requirement",
            StageKind::System => "system",
            StageKind::Interaction => "interaction",
            StageKind::Generate(_) => "generate",
            StageKind::Evaluate => "evaluate",
            StageKind::Repair(_) => "repair",
        }
    }

    pub fn diagram_type(&self) -> Option<DiagramType> {
        match self {
            StageKind::Generate(t) | StageKind::Repair(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.diagram_type() {
            Some(t) => write!(f, "{}({})", self.name(), t),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// What a stage produced
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Free text: analysis summaries and guidance
    Text(String),
    /// Extracted diagram code
    Diagram(String),
    /// A fresh quality report
    Report(QualityReport),
}

impl StageOutput {
    pub fn into_text(self, stage: StageKind) -> Result<String, StageError> {
        match self {
            StageOutput::Text(text) => Ok(text),
            other => Err(StageError::unexpected(stage, &other)),
        }
    }

    pub fn into_diagram(self, stage: StageKind) -> Result<String, StageError> {
        match self {
            StageOutput::Diagram(code) => Ok(code),
            other => Err(StageError::unexpected(stage, &other)),
        }
    }

    pub fn into_report(self, stage: StageKind) -> Result<QualityReport, StageError> {
        match self {
            StageOutput::Report(report) => Ok(report),
            other => Err(StageError::unexpected(stage, &other)),
        }
    }

    fn variant(&self) -> &'static str {
        match self {
            StageOutput::Text(_) => "text",
            StageOutput::Diagram(_) => "diagram",
            StageOutput::Report(_) => "report",
        }
    }
}

/// A pipeline stage
#[async_trait]
pub trait Capability: Send + Sync {
    async fn process(&self, stage: StageKind, context: &StageContext) -> Result<StageOutput, StageError>;
}

/// Dispatch table from stage kind to implementation
#[derive(Clone)]
pub struct Capabilities {
    pub requirement: Arc<dyn Capability>,
    pub system: Arc<dyn Capability>,
    /// Answers both `Generate` and `Repair`
    pub generator: Arc<dyn Capability>,
    pub evaluator: Arc<dyn Capability>,
    /// Interaction optimization is skipped when absent
    pub interaction: Option<Arc<dyn Capability>>,
}

impl Capabilities {
    pub fn for_stage(&self, stage: StageKind) -> Option<&Arc<dyn Capability>> {
        match stage {
            StageKind::Requirement => Some(&self.requirement),
            StageKind::System => Some(&self.system),
            StageKind::Interaction => self.interaction.as_ref(),
            StageKind::Generate(_) | StageKind::Repair(_) => Some(&self.generator),
            StageKind::Evaluate => Some(&self.evaluator),
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("interaction", &self.interaction.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub mod mock {
    //! Scripted capabilities for state machine and orchestrator tests

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::{DimensionScores, QualityWeights, RatingThresholds};

    /// Report whose every dimension (and so the aggregate) equals `score`
    pub fn report(score: f64) -> QualityReport {
        QualityReport::new(
            DimensionScores::uniform(score),
            Vec::new(),
            vec![format!("raise the score above {}", score)],
            &QualityWeights::default(),
            &RatingThresholds::default(),
        )
    }

    /// Returns queued results in order, then repeats a fallback
    pub struct ScriptedCapability {
        script: Mutex<VecDeque<Result<StageOutput, StageError>>>,
        fallback: Result<StageOutput, StageError>,
        calls: AtomicUsize,
        stages: Mutex<Vec<StageKind>>,
        delay: Option<Duration>,
    }

    impl ScriptedCapability {
        pub fn new(script: Vec<Result<StageOutput, StageError>>, fallback: Result<StageOutput, StageError>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
                stages: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn always(output: Result<StageOutput, StageError>) -> Self {
            Self::new(Vec::new(), output)
        }

        pub fn text(text: &str) -> Self {
            Self::always(Ok(StageOutput::Text(text.to_string())))
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn stages(&self) -> Vec<StageKind> {
            self.stages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Capability for ScriptedCapability {
        async fn process(&self, stage: StageKind, _context: &StageContext) -> Result<StageOutput, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stages.lock().unwrap().push(stage);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Generator whose behavior depends on the diagram type
    pub struct PerTypeGenerator {
        failing: HashMap<DiagramType, StageError>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl PerTypeGenerator {
        pub fn new() -> Self {
            Self {
                failing: HashMap::new(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            }
        }

        pub fn failing(mut self, diagram_type: DiagramType, error: StageError) -> Self {
            self.failing.insert(diagram_type, error);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Highest number of overlapping calls observed
        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Capability for PerTypeGenerator {
        async fn process(&self, stage: StageKind, _context: &StageContext) -> Result<StageOutput, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let diagram_type = stage.diagram_type().unwrap_or(DiagramType::Flowchart);
            match self.failing.get(&diagram_type) {
                Some(error) => Err(error.clone()),
                None => Ok(StageOutput::Diagram(format!("flowchart TD\n  %% {}\n  A --> B", diagram_type))),
            }
        }
    }

    /// Capabilities where analysis succeeds and the given generator and
    /// evaluator do the interesting work
    pub fn capabilities(generator: Arc<dyn Capability>, evaluator: Arc<dyn Capability>) -> Capabilities {
        Capabilities {
            requirement: Arc::new(ScriptedCapability::text("requirement summary")),
            system: Arc::new(ScriptedCapability::text("system summary")),
            generator,
            evaluator,
            interaction: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn test_stage_kind_names() {
        assert_eq!(StageKind::Requirement.name(), "requirement");
        assert_eq!(StageKind::Generate(DiagramType::Sequence).name(), "generate");
        assert_eq!(StageKind::Repair(DiagramType::Sequence).name(), "repair");
        assert_eq!(StageKind::Generate(DiagramType::Sequence).to_string(), "generate(sequence)");
        assert_eq!(StageKind::Evaluate.to_string(), "evaluate");
        assert_eq!(StageKind::Evaluate.diagram_type(), None);
    }

    #[test]
    fn test_dispatch_table() {
        let generator: Arc<dyn Capability> = Arc::new(ScriptedCapability::text("g"));
        let evaluator: Arc<dyn Capability> = Arc::new(ScriptedCapability::text("e"));
        let caps = capabilities(generator.clone(), evaluator.clone());

        assert!(Arc::ptr_eq(
            caps.for_stage(StageKind::Repair(DiagramType::Flowchart)).unwrap(),
            &generator
        ));
        assert!(Arc::ptr_eq(caps.for_stage(StageKind::Evaluate).unwrap(), &evaluator));
        assert!(caps.for_stage(StageKind::Interaction).is_none());
    }

    #[test]
    fn test_output_conversion_rejects_wrong_variant() {
        let err = StageOutput::Text("hi".into())
            .into_diagram(StageKind::Generate(DiagramType::Flowchart))
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(
            StageOutput::Report(report(80.0)).into_report(StageKind::Evaluate).unwrap().aggregate(),
            80.0
        );
    }
}
