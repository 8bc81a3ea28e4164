//! Pull Mermaid source out of free-form model output

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::compile_pattern;

static MERMAID_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern("mermaid fence", r"(?is)```mermaid[ \t]*\r?\n?(.*?)```"));

static BARE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern("bare fence", r"(?s)```[a-zA-Z]*[ \t]*\r?\n(.*?)```"));

fn fenced<'a>(pattern: &LazyLock<Option<Regex>>, text: &'a str) -> Option<&'a str> {
    pattern.as_ref()?.captures(text)?.get(1).map(|m| m.as_str())
}

/// Extract diagram code from a model response
///
/// Tries, in order: a ```mermaid fence, any other fence, a JSON object with a
/// `diagram_code` field, then the trimmed raw text.
pub fn extract_mermaid(text: &str) -> String {
    debug!(len = text.len(), "extract_mermaid: called");

    if let Some(code) = fenced(&MERMAID_FENCE, text) {
        debug!("extract_mermaid: mermaid fence");
        return code.trim().to_string();
    }

    if let Some(code) = fenced(&BARE_FENCE, text) {
        let code = code.trim();
        if !code.starts_with('{') {
            debug!("extract_mermaid: bare fence");
            return code.to_string();
        }
        if let Some(found) = diagram_code_field(code) {
            return found;
        }
    }

    if let Some(found) = diagram_code_field(text) {
        return found;
    }

    debug!("extract_mermaid: raw text");
    text.trim().to_string()
}

/// Look for `{"diagram_code": "..."}` between the first `{` and the last `}`
fn diagram_code_field(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    let code = value.get("diagram_code")?.as_str()?;
    debug!("extract_mermaid: json diagram_code");
    // Models sometimes wrap the field contents in a fence as well
    match fenced(&MERMAID_FENCE, code) {
        Some(inner) => Some(inner.trim().to_string()),
        None => Some(code.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_patterns_compile() {
        assert!(MERMAID_FENCE.is_some());
        assert!(BARE_FENCE.is_some());
    }

    #[test]
    fn test_broken_pattern_yields_none() {
        assert!(compile_pattern("unbalanced", r"(unclosed").is_none());
    }

    #[test]
    fn test_extracts_mermaid_fence() {
        let text = "Here you go:\n```mermaid\nflowchart TD\n    A --> B\n```\nEnjoy.";
        assert_eq!(extract_mermaid(text), "flowchart TD\n    A --> B");
    }

    #[test]
    fn test_mermaid_fence_is_case_insensitive() {
        let text = "```Mermaid\ngraph LR\n  A --> B\n```";
        assert_eq!(extract_mermaid(text), "graph LR\n  A --> B");
    }

    #[test]
    fn test_extracts_bare_fence() {
        let text = "```\nsequenceDiagram\n  A->>B: hi\n```";
        assert_eq!(extract_mermaid(text), "sequenceDiagram\n  A->>B: hi");
    }

    #[test]
    fn test_extracts_json_field() {
        let text = r#"Result: {"diagram_code": "erDiagram\n  USER ||--o{ ORDER : places", "notes": "x"}"#;
        assert_eq!(extract_mermaid(text), "erDiagram\n  USER ||--o{ ORDER : places");
    }

    #[test]
    fn test_extracts_json_inside_json_fence() {
        let text = "```json\n{\"diagram_code\": \"graph TD\\n  A --> B\"}\n```";
        assert_eq!(extract_mermaid(text), "graph TD\n  A --> B");
    }

    #[test]
    fn test_falls_back_to_raw_text() {
        assert_eq!(extract_mermaid("  classDiagram\n  A <|-- B  \n"), "classDiagram\n  A <|-- B");
    }
}
