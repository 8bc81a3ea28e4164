//! Diagram types and generation preferences

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Unknown diagram type, complexity or detail name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} '{value}'. Expected one of: {expected}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

/// Supported diagram types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramType {
    ErDiagram,
    ClassDiagram,
    UseCase,
    Flowchart,
    Sequence,
    Activity,
    Collaboration,
    FunctionStructure,
    SystemArchitecture,
}

impl DiagramType {
    /// All types in declaration order
    pub const ALL: [DiagramType; 9] = [
        DiagramType::ErDiagram,
        DiagramType::ClassDiagram,
        DiagramType::UseCase,
        DiagramType::Flowchart,
        DiagramType::Sequence,
        DiagramType::Activity,
        DiagramType::Collaboration,
        DiagramType::FunctionStructure,
        DiagramType::SystemArchitecture,
    ];

    /// Stable identifier used in config files and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::ErDiagram => "er_diagram",
            DiagramType::ClassDiagram => "class_diagram",
            DiagramType::UseCase => "use_case",
            DiagramType::Flowchart => "flowchart",
            DiagramType::Sequence => "sequence",
            DiagramType::Activity => "activity",
            DiagramType::Collaboration => "collaboration",
            DiagramType::FunctionStructure => "function_structure",
            DiagramType::SystemArchitecture => "system_architecture",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            DiagramType::ErDiagram => "E-R Diagram",
            DiagramType::ClassDiagram => "UML Class Diagram",
            DiagramType::UseCase => "Use Case Diagram",
            DiagramType::Flowchart => "Flowchart",
            DiagramType::Sequence => "Sequence Diagram",
            DiagramType::Activity => "Activity Diagram",
            DiagramType::Collaboration => "Collaboration Diagram",
            DiagramType::FunctionStructure => "Function Structure Diagram",
            DiagramType::SystemArchitecture => "System Architecture Diagram",
        }
    }

    /// Mermaid header keywords a diagram of this type may start with
    pub fn mermaid_headers(&self) -> &'static [&'static str] {
        match self {
            DiagramType::ErDiagram => &["erDiagram"],
            DiagramType::ClassDiagram => &["classDiagram"],
            DiagramType::Sequence => &["sequenceDiagram"],
            DiagramType::Flowchart | DiagramType::Activity => &["flowchart", "graph"],
            DiagramType::UseCase
            | DiagramType::Collaboration
            | DiagramType::FunctionStructure
            | DiagramType::SystemArchitecture => &["graph", "flowchart"],
        }
    }

    /// Type-specific authoring guidance folded into generation prompts
    pub fn guidance(&self) -> &'static str {
        match self {
            DiagramType::ErDiagram => {
                "Use erDiagram syntax. Name every entity with its key attributes and mark relationship cardinality (||--o{, }|--||)."
            }
            DiagramType::ClassDiagram => {
                "Use classDiagram syntax. Include attributes and methods with visibility markers (+, -, #, ~) and show inheritance, realization and association."
            }
            DiagramType::UseCase => {
                "Use graph syntax. Show actors, the main use cases, actor-to-use-case links and the system boundary."
            }
            DiagramType::Flowchart => {
                "Use flowchart TD or LR syntax. Mark clear start and end nodes, use decision nodes for branches and keep the flow linear where possible."
            }
            DiagramType::Sequence => {
                "Use sequenceDiagram syntax. Declare participants, order messages in time, use activations and include return messages."
            }
            DiagramType::Activity => {
                "Use flowchart syntax. Mark start and end activities, use diamonds for decisions and show parallel branches with their conditions."
            }
            DiagramType::Collaboration => {
                "Use graph syntax. Show collaborating objects, number the messages between them and label object roles."
            }
            DiagramType::FunctionStructure => {
                "Use graph TD syntax. Arrange function modules hierarchically and show calls between modules."
            }
            DiagramType::SystemArchitecture => {
                "Use graph syntax. Show system layers, component dependencies, data flow direction and external system interfaces."
            }
        }
    }

    pub fn expected() -> String {
        Self::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiagramType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "DiagramType::from_str: called");
        let normalized = s.trim().to_lowercase().replace('-', "_");
        // Accept a few historical aliases
        let normalized = match normalized.as_str() {
            "er" => "er_diagram",
            "uml_class" | "class" => "class_diagram",
            "use_case_diagram" => "use_case",
            "sequence_diagram" => "sequence",
            "activity_diagram" => "activity",
            "collaboration_diagram" => "collaboration",
            "function_structure_diagram" => "function_structure",
            "system_architecture_diagram" | "architecture" => "system_architecture",
            other => other,
        };
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseError {
                kind: "diagram type",
                value: s.to_string(),
                expected: Self::expected(),
            })
    }
}

/// Requested diagram complexity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }

    /// Minimum element count a diagram at this complexity should reach
    pub fn min_elements(&self) -> usize {
        match self {
            Complexity::Simple => 3,
            Complexity::Medium => 6,
            Complexity::Complex => 10,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Complexity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Complexity::Simple),
            "medium" => Ok(Complexity::Medium),
            "complex" => Ok(Complexity::Complex),
            _ => Err(ParseError {
                kind: "complexity",
                value: s.to_string(),
                expected: "simple, medium, complex".to_string(),
            }),
        }
    }
}

/// Requested level of detail in labels and descriptions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Brief,
    #[default]
    Standard,
    Detailed,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Brief => "brief",
            DetailLevel::Standard => "standard",
            DetailLevel::Detailed => "detailed",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brief" => Ok(DetailLevel::Brief),
            "standard" => Ok(DetailLevel::Standard),
            "detailed" => Ok(DetailLevel::Detailed),
            _ => Err(ParseError {
                kind: "detail level",
                value: s.to_string(),
                expected: "brief, standard, detailed".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagram_type_roundtrips_through_str() {
        for t in DiagramType::ALL {
            assert_eq!(t.as_str().parse::<DiagramType>().unwrap(), t);
        }
    }

    #[test]
    fn test_diagram_type_aliases() {
        assert_eq!("uml_class".parse::<DiagramType>().unwrap(), DiagramType::ClassDiagram);
        assert_eq!("Use-Case".parse::<DiagramType>().unwrap(), DiagramType::UseCase);
        assert_eq!(
            "system_architecture_diagram".parse::<DiagramType>().unwrap(),
            DiagramType::SystemArchitecture
        );
    }

    #[test]
    fn test_diagram_type_unknown() {
        let err = "gantt".parse::<DiagramType>().unwrap_err();
        assert_eq!(err.value, "gantt");
        assert!(err.to_string().contains("flowchart"));
    }

    #[test]
    fn test_diagram_type_serde_snake_case() {
        let json = serde_json::to_string(&DiagramType::SystemArchitecture).unwrap();
        assert_eq!(json, "\"system_architecture\"");
        let back: DiagramType = serde_json::from_str("\"er_diagram\"").unwrap();
        assert_eq!(back, DiagramType::ErDiagram);
    }

    #[test]
    fn test_headers() {
        assert_eq!(DiagramType::Sequence.mermaid_headers(), &["sequenceDiagram"]);
        assert!(DiagramType::Activity.mermaid_headers().contains(&"flowchart"));
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("COMPLEX".parse::<Complexity>().unwrap(), Complexity::Complex);
        assert_eq!("brief".parse::<DetailLevel>().unwrap(), DetailLevel::Brief);
        assert!("huge".parse::<Complexity>().is_err());
        assert!("verbose".parse::<DetailLevel>().is_err());
        assert_eq!(Complexity::default(), Complexity::Medium);
        assert_eq!(DetailLevel::default(), DetailLevel::Standard);
    }
}
