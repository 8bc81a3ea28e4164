//! Deterministic Mermaid quality heuristics
//!
//! Every dimension starts at 100 and loses points per finding. Scoring is a
//! pure function of (diagram type, complexity, code) so evaluating the same
//! text twice always yields the same report.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use super::{SyntaxValidator, compile_pattern};
use crate::domain::{
    Complexity, DiagramType, DimensionScores, QualityDimension, QualityIssue, QualityReport, QualityWeights,
    RatingThresholds,
};

/// Header keywords Mermaid recognizes
const KNOWN_HEADERS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "erDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
    "mindmap",
];

/// Flowchart directions accepted after `graph`/`flowchart`
const DIRECTIONS: &[&str] = &["TD", "TB", "BT", "RL", "LR"];

/// Statements that neither declare an element nor relate two
const STRUCTURAL: &[&str] = &[
    "end",
    "subgraph",
    "style",
    "classDef",
    "linkStyle",
    "click",
    "direction",
    "title",
    "note",
    "Note",
    "loop",
    "alt",
    "else",
    "opt",
    "par",
    "and",
    "rect",
    "critical",
    "break",
    "activate",
    "deactivate",
    "autonumber",
];

/// Statements whose second token names the declared element
const DECLARING: &[&str] = &["class", "participant", "actor", "state"];

const LONG_IDENTIFIER: usize = 30;
const CROWDED_ELEMENTS: usize = 30;
const OVERCROWDED_ELEMENTS: usize = 50;
const COMMENT_WORTHY_ELEMENTS: usize = 10;

static ARROW: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_pattern(
        "arrow",
        r"(?:<\|)?[|}o*x<]{0,2}(?:--+|==+|-\.+-|\.\.+|->)[-.]*(?:\|\||\|\{|\|>|o\||o\{|>>|[>ox*])?",
    )
});

static WORD: LazyLock<Option<Regex>> = LazyLock::new(|| compile_pattern("word", r"\w+"));

/// Per-dimension scores and findings before suggestions are derived
#[derive(Debug, Clone, PartialEq)]
struct Assessment {
    scores: DimensionScores,
    issues: Vec<QualityIssue>,
}

impl Assessment {
    fn perfect() -> Self {
        Self {
            scores: DimensionScores::uniform(100.0),
            issues: Vec::new(),
        }
    }

    fn penalize(&mut self, dimension: QualityDimension, points: f64, message: impl Into<String>) {
        let current = self.scores.get(dimension);
        self.scores.set(dimension, current - points);
        self.issues.push(QualityIssue::new(dimension, message));
    }
}

/// One statement of the diagram body
struct Line<'a> {
    number: usize,
    text: &'a str,
}

/// Rule-based Mermaid validator
#[derive(Debug, Clone, Default)]
pub struct MermaidValidator {
    weights: QualityWeights,
    thresholds: RatingThresholds,
}

impl MermaidValidator {
    pub fn new(weights: QualityWeights, thresholds: RatingThresholds) -> Self {
        Self { weights, thresholds }
    }

    /// Score all five dimensions
    fn assess(&self, diagram_type: DiagramType, complexity: Complexity, code: &str) -> Assessment {
        debug!(%diagram_type, %complexity, len = code.len(), "assess: called");
        let mut assessment = Assessment::perfect();

        let statements: Vec<Line<'_>> = code
            .lines()
            .enumerate()
            .map(|(i, l)| Line {
                number: i + 1,
                text: l.trim(),
            })
            .filter(|l| !l.text.is_empty())
            .collect();
        let has_comments = statements.iter().any(|l| l.text.starts_with("%%"));
        let statements: Vec<Line<'_>> = statements.into_iter().filter(|l| !l.text.starts_with("%%")).collect();

        let Some((header, body)) = statements.split_first() else {
            debug!("assess: empty diagram");
            let mut empty = Assessment {
                scores: DimensionScores::uniform(0.0),
                issues: Vec::new(),
            };
            empty
                .issues
                .push(QualityIssue::new(QualityDimension::SyntaxCorrectness, "diagram code is empty"));
            return empty;
        };

        let elements = count_elements(body);
        let relations: Vec<&Line<'_>> = body.iter().filter(|l| find_arrow(l.text).is_some()).collect();
        debug!(elements, relations = relations.len(), "assess: parsed");

        check_syntax(&mut assessment, header, body);
        check_completeness(&mut assessment, complexity, elements, relations.len(), body.is_empty());
        check_clarity(&mut assessment, body, elements, has_comments);
        check_accuracy(&mut assessment, &relations);
        check_usability(&mut assessment, diagram_type, header, body);

        assessment
    }

    /// Turn an assessment into a report with derived suggestions
    fn report(&self, assessment: Assessment) -> QualityReport {
        let suggestions = suggestions_for(&assessment.issues);
        QualityReport::new(
            assessment.scores,
            assessment.issues,
            suggestions,
            &self.weights,
            &self.thresholds,
        )
    }
}

impl SyntaxValidator for MermaidValidator {
    fn evaluate(&self, diagram_type: DiagramType, complexity: Complexity, code: &str) -> QualityReport {
        self.report(self.assess(diagram_type, complexity, code))
    }

    fn revise(
        &self,
        report: &QualityReport,
        dimension: QualityDimension,
        score: f64,
        findings: Vec<String>,
    ) -> QualityReport {
        debug!(%dimension, %score, findings = findings.len(), "revise: called");
        let mut scores = *report.scores();
        scores.set(dimension, score);
        let mut issues: Vec<QualityIssue> = report
            .issues()
            .iter()
            .filter(|i| i.dimension != dimension)
            .cloned()
            .collect();
        issues.extend(findings.into_iter().map(|m| QualityIssue::new(dimension, m)));
        self.report(Assessment { scores, issues })
    }

    fn repair_hint(&self, report: &QualityReport) -> String {
        let mut hint = format!(
            "The previous diagram scored {:.1} ({}).",
            report.aggregate(),
            report.rating()
        );
        if !report.issues().is_empty() {
            hint.push_str("\nIssues to fix:");
            for issue in report.issues() {
                hint.push_str(&format!("\n- [{}] {}", issue.dimension, issue.message));
            }
        }
        if !report.suggestions().is_empty() {
            hint.push_str("\nSuggestions:");
            for suggestion in report.suggestions() {
                hint.push_str(&format!("\n- {}", suggestion));
            }
        }
        hint
    }
}

fn find_arrow(text: &str) -> Option<(usize, usize)> {
    let m = ARROW.as_ref()?.find(text)?;
    Some((m.start(), m.end()))
}

fn first_word(text: &str) -> Option<&str> {
    WORD.as_ref()?.find(text).filter(|m| m.start() == 0).map(|m| m.as_str())
}

/// Distinct element identifiers: relation endpoints plus standalone declarations
fn count_elements(body: &[Line<'_>]) -> usize {
    let mut ids: HashSet<&str> = HashSet::new();
    let mut depth = 0usize;

    for line in body {
        let text = line.text;
        if depth > 0 {
            depth = depth.saturating_sub(text.matches('}').count());
            continue;
        }

        if let Some((start, end)) = find_arrow(text) {
            if let Some(id) = first_word(text[..start].trim()) {
                ids.insert(id);
            }
            if let Some(id) = first_word(strip_edge_label(&text[end..])) {
                ids.insert(id);
            }
        } else {
            let mut tokens = text.split_whitespace();
            match tokens.next() {
                Some(keyword) if STRUCTURAL.contains(&keyword) => {}
                Some(keyword) if DECLARING.contains(&keyword) => {
                    if let Some(id) = tokens.next().and_then(first_word) {
                        ids.insert(id);
                    }
                }
                Some(_) => {
                    if let Some(id) = first_word(text) {
                        ids.insert(id);
                    }
                }
                None => {}
            }
        }

        // Attribute and member blocks: `Entity {` ... `}`
        if text.ends_with('{') {
            depth += 1;
        }
    }
    ids.len()
}

/// Drop a leading `|label|` from the target side of an edge
fn strip_edge_label(rest: &str) -> &str {
    let rest = rest.trim_start();
    if let Some(after) = rest.strip_prefix('|') {
        match after.find('|') {
            Some(close) => after[close + 1..].trim_start(),
            None => after.trim_start(),
        }
    } else {
        rest
    }
}

fn has_non_ascii(text: &str) -> bool {
    !text.is_ascii()
}

fn check_syntax(assessment: &mut Assessment, header: &Line<'_>, body: &[Line<'_>]) {
    let keyword = header.text.split_whitespace().next().unwrap_or_default();
    if !KNOWN_HEADERS.contains(&keyword) {
        assessment.penalize(
            QualityDimension::SyntaxCorrectness,
            40.0,
            format!("line {}: `{}` is not a Mermaid diagram header", header.number, keyword),
        );
    }

    if body.is_empty() {
        assessment.penalize(
            QualityDimension::SyntaxCorrectness,
            30.0,
            "diagram has a header but no content",
        );
        return;
    }

    let mut balance = [0i64; 3];
    let mut quotes = 0usize;
    for line in body {
        let stripped = match ARROW.as_ref() {
            Some(arrow) => arrow.replace_all(line.text, " ").into_owned(),
            None => line.text.to_string(),
        };
        let mut in_quotes = false;
        for c in stripped.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    quotes += 1;
                }
                _ if in_quotes => {}
                '(' => balance[0] += 1,
                ')' => balance[0] -= 1,
                '[' => balance[1] += 1,
                ']' => balance[1] -= 1,
                '{' => balance[2] += 1,
                '}' => balance[2] -= 1,
                _ => {}
            }
        }
    }

    for (pair, count) in ["()", "[]", "{}"].iter().zip(balance) {
        if count != 0 {
            assessment.penalize(
                QualityDimension::SyntaxCorrectness,
                15.0,
                format!("unbalanced `{}` brackets", pair),
            );
        }
    }
    if quotes % 2 != 0 {
        assessment.penalize(QualityDimension::SyntaxCorrectness, 15.0, "unterminated double quote");
    }
}

fn check_completeness(
    assessment: &mut Assessment,
    complexity: Complexity,
    elements: usize,
    relations: usize,
    empty_body: bool,
) {
    let expected = complexity.min_elements();
    if elements < expected {
        assessment.penalize(
            QualityDimension::LogicalCompleteness,
            10.0 * (expected - elements) as f64,
            format!(
                "diagram has {} elements, expected at least {} for {} complexity",
                elements, expected, complexity
            ),
        );
    }
    if relations == 0 && !empty_body {
        assessment.penalize(
            QualityDimension::LogicalCompleteness,
            30.0,
            "no relationships between elements",
        );
    }
}

fn check_clarity(assessment: &mut Assessment, body: &[Line<'_>], elements: usize, has_comments: bool) {
    for line in body {
        if let Some(word) = WORD.as_ref() {
            for m in word.find_iter(line.text) {
                if m.as_str().chars().count() > LONG_IDENTIFIER {
                    let shown: String = m.as_str().chars().take(20).collect();
                    assessment.penalize(
                        QualityDimension::VisualClarity,
                        5.0,
                        format!("line {}: identifier too long: {}...", line.number, shown),
                    );
                }
            }
        }
        if has_non_ascii(line.text) && !line.text.contains('"') {
            assessment.penalize(
                QualityDimension::VisualClarity,
                3.0,
                format!("line {}: non-ASCII label should be quoted", line.number),
            );
        }
    }

    if elements > OVERCROWDED_ELEMENTS {
        assessment.penalize(
            QualityDimension::VisualClarity,
            10.0,
            format!("{} elements is too many to read comfortably", elements),
        );
    } else if elements > CROWDED_ELEMENTS {
        assessment.penalize(
            QualityDimension::VisualClarity,
            5.0,
            format!("{} elements; consider simplifying", elements),
        );
    }

    if !has_comments && elements > COMMENT_WORTHY_ELEMENTS {
        assessment.penalize(
            QualityDimension::VisualClarity,
            5.0,
            "larger diagrams should carry %% comments",
        );
    }
}

fn check_accuracy(assessment: &mut Assessment, relations: &[&Line<'_>]) {
    let mut seen: HashSet<&str> = HashSet::new();
    for line in relations {
        let Some((start, end)) = find_arrow(line.text) else {
            continue;
        };
        let source = line.text[..start].trim();
        let target = strip_edge_label(&line.text[end..]);
        if source.is_empty() || target.is_empty() {
            assessment.penalize(
                QualityDimension::InformationAccuracy,
                10.0,
                format!("line {}: relationship is missing its source or target", line.number),
            );
        }
        if line.text.matches('|').count() % 2 != 0 && !line.text.contains("||") && !line.text.contains("<|") {
            assessment.penalize(
                QualityDimension::InformationAccuracy,
                5.0,
                format!("line {}: unterminated edge label", line.number),
            );
        }
        if !seen.insert(line.text) {
            assessment.penalize(
                QualityDimension::InformationAccuracy,
                3.0,
                format!("line {}: duplicate relationship", line.number),
            );
        }
    }
}

fn check_usability(assessment: &mut Assessment, diagram_type: DiagramType, header: &Line<'_>, body: &[Line<'_>]) {
    let mut tokens = header.text.split_whitespace();
    let keyword = tokens.next().unwrap_or_default();
    if !diagram_type.mermaid_headers().contains(&keyword) {
        assessment.penalize(
            QualityDimension::Usability,
            20.0,
            format!(
                "{} should start with {}",
                diagram_type.display_name(),
                diagram_type.mermaid_headers().join(" or ")
            ),
        );
    }
    if matches!(keyword, "graph" | "flowchart") && !tokens.next().is_some_and(|d| DIRECTIONS.contains(&d)) {
        assessment.penalize(
            QualityDimension::Usability,
            5.0,
            "flowchart header should declare a direction (TD, LR, ...)",
        );
    }

    for line in body {
        if has_non_ascii(line.text) && !(line.text.contains('"') || line.text.contains('\'')) {
            assessment.penalize(
                QualityDimension::Usability,
                2.0,
                format!("line {}: non-ASCII content should be quoted", line.number),
            );
        }
    }
}

/// One suggestion per dimension that has findings, in dimension order
fn suggestions_for(issues: &[QualityIssue]) -> Vec<String> {
    let mut suggestions: Vec<String> = QualityDimension::ALL
        .iter()
        .filter(|d| issues.iter().any(|i| i.dimension == **d))
        .map(|d| {
            match d {
                QualityDimension::SyntaxCorrectness => "Fix the syntax errors so the Mermaid code parses",
                QualityDimension::LogicalCompleteness => "Add the missing key elements and the relationships between them",
                QualityDimension::VisualClarity => "Shorten names, quote labels and simplify the layout for readability",
                QualityDimension::InformationAccuracy => "Check every relationship has a correct source, target and label",
                QualityDimension::Usability => "Use the Mermaid header and conventions expected for this diagram type",
            }
            .to_string()
        })
        .collect();
    if suggestions.is_empty() {
        suggestions.push("Diagram quality is good; keep the current structure".to_string());
    }
    suggestions
}
