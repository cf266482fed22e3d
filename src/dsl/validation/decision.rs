use std::collections::HashSet;

use crate::dsl::schema::{DecisionConfig, FlowDefinition};
use crate::evaluator::parse_condition;
use crate::nodes::NodeType;

use super::types::Diagnostic;

/// Decision completeness: conditions, default target, resolvable targets and
/// conditions that compile.
pub fn validate(flow: &FlowDefinition) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let ids: HashSet<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();

    for node in &flow.nodes {
        if NodeType::from_tag(&node.node_type) != Some(NodeType::Decision) {
            continue;
        }

        let config = match DecisionConfig::resolve(node, flow) {
            Ok(c) => c,
            Err(e) => {
                diags.push(
                    Diagnostic::error("E005", format!("Invalid decision config: {}", e))
                        .on_node(&node.id)
                        .at("data.config"),
                );
                continue;
            }
        };

        if config.conditions.is_empty() {
            diags.push(
                Diagnostic::error("E020", "Decision node has no conditions")
                    .on_node(&node.id)
                    .at("data.config.conditions"),
            );
        }

        match config.default_target.as_deref() {
            None | Some("") => diags.push(
                Diagnostic::error("E021", "Decision node has no defaultTarget")
                    .on_node(&node.id)
                    .at("data.config.defaultTarget"),
            ),
            Some(target) if !ids.contains(target) => diags.push(
                Diagnostic::error("E022", format!("defaultTarget '{}' does not exist", target))
                    .on_node(&node.id)
                    .at("data.config.defaultTarget"),
            ),
            Some(_) => {}
        }

        for (i, cond) in config.conditions.iter().enumerate() {
            if !ids.contains(cond.target_node_id.as_str()) {
                diags.push(
                    Diagnostic::error(
                        "E022",
                        format!("Condition target '{}' does not exist", cond.target_node_id),
                    )
                    .on_node(&node.id)
                    .at(format!("data.config.conditions[{}].targetNodeId", i)),
                );
            }
            if let Err(e) = parse_condition(&cond.condition) {
                diags.push(
                    Diagnostic::error("E023", format!("'{}': {}", cond.condition, e))
                        .on_node(&node.id)
                        .at(format!("data.config.conditions[{}].condition", i)),
                );
            }
        }

        let targets: HashSet<&str> = config
            .conditions
            .iter()
            .map(|c| c.target_node_id.as_str())
            .chain(config.default_target.as_deref())
            .collect();
        for edge in flow.outgoing(&node.id) {
            if !targets.contains(edge.target.as_str()) {
                diags.push(
                    Diagnostic::warning(
                        "W102",
                        format!("Edge to '{}' is never selected by the decision", edge.target),
                    )
                    .on_node(&node.id)
                    .on_edge(&edge.id),
                );
            }
        }
    }

    diags
}
