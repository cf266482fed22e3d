//! `{{field}}` template substitution.

pub mod variable_resolver;

pub use variable_resolver::{display_value, extract_fields, lookup_path, render};
