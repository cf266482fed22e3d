mod decision;
mod structure;
mod topology;
mod types;

use crate::dsl::parser::{parse_flow, FlowFormat};
use crate::dsl::schema::FlowDefinition;
use crate::nodes::NodeExecutorRegistry;

pub use types::{Diagnostic, DiagnosticLevel, ValidationReport};

/// Parse and validate flow text in one go. Parse failures are reported as
/// `E001`.
pub fn validate_flow_text(
    content: &str,
    format: FlowFormat,
    registry: &NodeExecutorRegistry,
) -> ValidationReport {
    match parse_flow(content, format) {
        Ok(flow) => validate_flow(&flow, registry),
        Err(err) => ValidationReport::from_diagnostics(vec![Diagnostic::error(
            "E001",
            format!("Flow parse error: {}", err),
        )]),
    }
}

pub fn validate_flow(flow: &FlowDefinition, registry: &NodeExecutorRegistry) -> ValidationReport {
    let mut diagnostics = structure::validate(flow, registry);

    // Broken ids or endpoints make the topology checks meaningless.
    let has_fatal_structure = diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Error && matches!(d.code.as_str(), "E002" | "E003" | "E006" | "E007"));

    diagnostics.extend(decision::validate(flow));
    if !has_fatal_structure {
        diagnostics.extend(topology::validate(flow));
    }

    ValidationReport::from_diagnostics(diagnostics)
}
