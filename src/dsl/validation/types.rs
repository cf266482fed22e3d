//! Validation diagnostic types.

use serde::{Deserialize, Serialize};

/// Severity level of a validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub node_id: Option<String>,
    pub edge_id: Option<String>,
    pub field_path: Option<String>,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, code, message)
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, code, message)
    }

    fn new(level: DiagnosticLevel, code: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            code: code.to_string(),
            message: message.into(),
            node_id: None,
            edge_id: None,
            field_path: None,
        }
    }

    pub fn on_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn on_edge(mut self, edge_id: impl Into<String>) -> Self {
        self.edge_id = Some(edge_id.into());
        self
    }

    pub fn at(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)?;
        if let Some(node) = &self.node_id {
            write!(f, " (node {})", node)?;
        }
        if let Some(edge) = &self.edge_id {
            write!(f, " (edge {})", edge)?;
        }
        Ok(())
    }
}

/// Aggregated result of flow validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let is_valid = diagnostics
            .iter()
            .all(|d| d.level != DiagnosticLevel::Error);
        Self {
            is_valid,
            diagnostics,
        }
    }

    /// Return only the error-level diagnostics.
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .collect()
    }

    /// Return only the warning-level diagnostics.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .collect()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    /// One line per error, for error messages and logs.
    pub fn summary(&self) -> String {
        self.errors()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_validity_follows_errors() {
        let report = ValidationReport::from_diagnostics(vec![Diagnostic::warning("W101", "cycle")]);
        assert!(report.is_valid);
        assert_eq!(report.warnings().len(), 1);

        let report = ValidationReport::from_diagnostics(vec![
            Diagnostic::warning("W101", "cycle"),
            Diagnostic::error("E006", "missing source").on_edge("e1"),
        ]);
        assert!(!report.is_valid);
        assert_eq!(report.errors().len(), 1);
        assert!(report.has_code("E006"));
    }

    #[test]
    fn test_summary_names_node_and_edge() {
        let report = ValidationReport::from_diagnostics(vec![
            Diagnostic::error("E006", "edge source 'x' does not exist").on_edge("e1"),
            Diagnostic::error("E030", "dead end").on_node("n2"),
        ]);
        let summary = report.summary();
        assert!(summary.contains("E006"));
        assert!(summary.contains("(edge e1)"));
        assert!(summary.contains("(node n2)"));
    }

    #[test]
    fn test_diagnostic_serde_roundtrip() {
        let d = Diagnostic::error("E023", "bad condition").on_node("route").at("conditions[1].condition");
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.field_path.as_deref(), Some("conditions[1].condition"));
        assert_eq!(back.level, DiagnosticLevel::Error);
    }
}
