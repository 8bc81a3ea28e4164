//! Quality reports: five scored dimensions, a weighted aggregate and a rating

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The five scored quality dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    SyntaxCorrectness,
    LogicalCompleteness,
    VisualClarity,
    InformationAccuracy,
    Usability,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 5] = [
        QualityDimension::SyntaxCorrectness,
        QualityDimension::LogicalCompleteness,
        QualityDimension::VisualClarity,
        QualityDimension::InformationAccuracy,
        QualityDimension::Usability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDimension::SyntaxCorrectness => "syntax_correctness",
            QualityDimension::LogicalCompleteness => "logical_completeness",
            QualityDimension::VisualClarity => "visual_clarity",
            QualityDimension::InformationAccuracy => "information_accuracy",
            QualityDimension::Usability => "usability",
        }
    }
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-dimension scores, each in 0..=100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub syntax_correctness: f64,
    pub logical_completeness: f64,
    pub visual_clarity: f64,
    pub information_accuracy: f64,
    pub usability: f64,
}

impl DimensionScores {
    /// Same score on every dimension
    pub fn uniform(score: f64) -> Self {
        Self {
            syntax_correctness: score,
            logical_completeness: score,
            visual_clarity: score,
            information_accuracy: score,
            usability: score,
        }
    }

    pub fn get(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::SyntaxCorrectness => self.syntax_correctness,
            QualityDimension::LogicalCompleteness => self.logical_completeness,
            QualityDimension::VisualClarity => self.visual_clarity,
            QualityDimension::InformationAccuracy => self.information_accuracy,
            QualityDimension::Usability => self.usability,
        }
    }

    pub fn set(&mut self, dimension: QualityDimension, score: f64) {
        let score = score.clamp(0.0, 100.0);
        match dimension {
            QualityDimension::SyntaxCorrectness => self.syntax_correctness = score,
            QualityDimension::LogicalCompleteness => self.logical_completeness = score,
            QualityDimension::VisualClarity => self.visual_clarity = score,
            QualityDimension::InformationAccuracy => self.information_accuracy = score,
            QualityDimension::Usability => self.usability = score,
        }
    }
}

/// Weights for combining dimension scores into the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub syntax: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub accuracy: f64,
    pub usability: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            syntax: 0.25,
            completeness: 0.25,
            clarity: 0.15,
            accuracy: 0.25,
            usability: 0.10,
        }
    }
}

impl QualityWeights {
    pub fn weight(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::SyntaxCorrectness => self.syntax,
            QualityDimension::LogicalCompleteness => self.completeness,
            QualityDimension::VisualClarity => self.clarity,
            QualityDimension::InformationAccuracy => self.accuracy,
            QualityDimension::Usability => self.usability,
        }
    }

    /// Weights must be non-negative with a positive sum
    pub fn validate(&self) -> Result<(), String> {
        let weights = QualityDimension::ALL.map(|d| self.weight(d));
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("quality weights must be finite and non-negative".to_string());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("quality weights must not all be zero".to_string());
        }
        Ok(())
    }

    /// Weighted mean rounded to one decimal
    ///
    /// Weights are normalized, so they need not sum to exactly 1.
    pub fn aggregate(&self, scores: &DimensionScores) -> f64 {
        let total_weight: f64 = QualityDimension::ALL.iter().map(|d| self.weight(*d)).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = QualityDimension::ALL
            .iter()
            .map(|d| self.weight(*d) * scores.get(*d).clamp(0.0, 100.0))
            .sum();
        ((weighted / total_weight) * 10.0).round() / 10.0
    }
}

/// Categorical rating derived from the aggregate score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Poor => "poor",
            QualityRating::Fair => "fair",
            QualityRating::Good => "good",
            QualityRating::Excellent => "excellent",
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lower bounds (inclusive) of each rating band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        Self {
            excellent: 90.0,
            good: 75.0,
            fair: 60.0,
        }
    }
}

impl RatingThresholds {
    pub fn rate(&self, score: f64) -> QualityRating {
        if score >= self.excellent {
            QualityRating::Excellent
        } else if score >= self.good {
            QualityRating::Good
        } else if score >= self.fair {
            QualityRating::Fair
        } else {
            QualityRating::Poor
        }
    }

    /// Bands must be ordered excellent > good > fair >= 0
    pub fn validate(&self) -> Result<(), String> {
        if !(self.excellent > self.good && self.good > self.fair && self.fair >= 0.0 && self.excellent <= 100.0) {
            return Err(format!(
                "rating thresholds must satisfy 100 >= excellent > good > fair >= 0 (got {}/{}/{})",
                self.excellent, self.good, self.fair
            ));
        }
        Ok(())
    }
}

/// One problem found during evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub dimension: QualityDimension,
    pub message: String,
}

impl QualityIssue {
    pub fn new(dimension: QualityDimension, message: impl Into<String>) -> Self {
        Self {
            dimension,
            message: message.into(),
        }
    }
}

/// Result of one evaluation; never mutated after construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    scores: DimensionScores,
    aggregate: f64,
    rating: QualityRating,
    issues: Vec<QualityIssue>,
    suggestions: Vec<String>,
}

impl QualityReport {
    /// Build a report, computing the aggregate and rating
    pub fn new(
        scores: DimensionScores,
        issues: Vec<QualityIssue>,
        suggestions: Vec<String>,
        weights: &QualityWeights,
        thresholds: &RatingThresholds,
    ) -> Self {
        let aggregate = weights.aggregate(&scores);
        let rating = thresholds.rate(aggregate);
        debug!(%aggregate, %rating, issue_count = issues.len(), "QualityReport::new: called");
        Self {
            scores,
            aggregate,
            rating,
            issues,
            suggestions,
        }
    }

    pub fn scores(&self) -> &DimensionScores {
        &self.scores
    }

    pub fn aggregate(&self) -> f64 {
        self.aggregate
    }

    pub fn rating(&self) -> QualityRating {
        self.rating
    }

    pub fn issues(&self) -> &[QualityIssue] {
        &self.issues
    }

    /// Improvement suggestions, most important first
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.aggregate >= threshold
    }
}
