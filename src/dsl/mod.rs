pub mod parser;
pub mod schema;
pub mod validation;

pub use parser::{load_flow, parse_flow, FlowFormat};
pub use schema::*;
pub use validation::{validate_flow, validate_flow_text, Diagnostic, DiagnosticLevel, ValidationReport};
