//! Flow parser: converts raw YAML/JSON text into [`FlowDefinition`].

use std::path::Path;

use super::schema::FlowDefinition;
use crate::error::WorkflowError;

/// Supported flow definition formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
}

impl FlowFormat {
    /// Guess the format from a file extension; JSON otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => FlowFormat::Yaml,
            _ => FlowFormat::Json,
        }
    }
}

/// Parse flow content into a FlowDefinition
pub fn parse_flow(content: &str, format: FlowFormat) -> Result<FlowDefinition, WorkflowError> {
    match format {
        FlowFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| WorkflowError::FlowParseError(e.to_string())),
        FlowFormat::Json => serde_json::from_str(content)
            .map_err(|e| WorkflowError::FlowParseError(e.to_string())),
    }
}

/// Read and parse a flow file.
pub fn load_flow(path: impl AsRef<Path>) -> Result<FlowDefinition, WorkflowError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::FlowParseError(format!("{}: {}", path.display(), e)))?;
    parse_flow(&content, FlowFormat::from_path(path))
}
