use std::collections::HashSet;

use crate::dsl::schema::FlowDefinition;
use crate::nodes::{NodeExecutorRegistry, NodeType};

use super::types::Diagnostic;

/// Ids, types, handler configs, edge endpoints and the start node.
pub fn validate(flow: &FlowDefinition, registry: &NodeExecutorRegistry) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut seen = HashSet::new();

    for (i, node) in flow.nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            diags.push(Diagnostic::error("E002", "Node id is empty").at(format!("nodes[{}].id", i)));
            continue;
        }
        if !seen.insert(node.id.as_str()) {
            diags.push(
                Diagnostic::error("E003", format!("Duplicate node id: {}", node.id)).on_node(&node.id),
            );
        }

        let Some(node_type) = NodeType::from_tag(&node.node_type) else {
            diags.push(
                Diagnostic::error("E004", format!("Unknown node type: {}", node.node_type))
                    .on_node(&node.id)
                    .at("type"),
            );
            continue;
        };
        match registry.get(node_type) {
            None => diags.push(
                Diagnostic::error(
                    "E004",
                    format!("No handler registered for node type: {}", node_type),
                )
                .on_node(&node.id),
            ),
            Some(executor) => {
                if let Err(e) = executor.validate(&node.data.config) {
                    diags.push(
                        Diagnostic::error("E005", e.to_string())
                            .on_node(&node.id)
                            .at("data.config"),
                    );
                }
            }
        }
    }

    for (i, edge) in flow.edges.iter().enumerate() {
        let edge_id = if edge.id.is_empty() {
            format!("edges[{}]", i)
        } else {
            edge.id.clone()
        };
        if !seen.contains(edge.source.as_str()) {
            diags.push(
                Diagnostic::error("E006", format!("Edge source '{}' does not exist", edge.source))
                    .on_edge(&edge_id),
            );
        }
        if !seen.contains(edge.target.as_str()) {
            diags.push(
                Diagnostic::error("E007", format!("Edge target '{}' does not exist", edge.target))
                    .on_edge(&edge_id),
            );
        }
    }

    for node in &flow.nodes {
        if let Some(fallback) = &node.data.fallback_target {
            if !seen.contains(fallback.as_str()) {
                diags.push(
                    Diagnostic::error(
                        "E008",
                        format!("Fallback target '{}' does not exist", fallback),
                    )
                    .on_node(&node.id)
                    .at("data.fallbackTarget"),
                );
            }
        }
    }

    let starts: Vec<&str> = flow
        .nodes
        .iter()
        .filter(|n| NodeType::from_tag(&n.node_type) == Some(NodeType::Start))
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        0 => diags.push(Diagnostic::error("E010", "Flow has no start node")),
        1 => {}
        _ => {
            for id in &starts[1..] {
                diags.push(
                    Diagnostic::error(
                        "E011",
                        format!("Multiple start nodes: {}", starts.join(", ")),
                    )
                    .on_node(*id),
                );
            }
        }
    }

    diags
}
