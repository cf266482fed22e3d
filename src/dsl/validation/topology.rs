use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;

use crate::dsl::schema::{DecisionConfig, FlowDefinition};
use crate::nodes::NodeType;

use super::types::Diagnostic;

/// Routing graph of a flow: plain edges, decision branches and fallback
/// targets all count as ways to reach a node.
fn routing_graph(flow: &FlowDefinition) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();
    for node in &flow.nodes {
        index
            .entry(node.id.as_str())
            .or_insert_with(|| graph.add_node(node.id.as_str()));
    }

    let link = |graph: &mut DiGraph<&str, ()>, from: &str, to: &str| {
        if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
            graph.update_edge(a, b, ());
        }
    };

    for edge in &flow.edges {
        link(&mut graph, &edge.source, &edge.target);
    }
    for node in &flow.nodes {
        if let Some(fallback) = &node.data.fallback_target {
            link(&mut graph, &node.id, fallback);
        }
        if NodeType::from_tag(&node.node_type) == Some(NodeType::Decision) {
            if let Ok(config) = DecisionConfig::resolve(node, flow) {
                for cond in &config.conditions {
                    link(&mut graph, &node.id, &cond.target_node_id);
                }
                if let Some(default) = &config.default_target {
                    link(&mut graph, &node.id, default);
                }
            }
        }
    }

    (graph, index)
}

/// Start/end placement, reachability, single successor rule and cycles.
pub fn validate(flow: &FlowDefinition) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let typed = |tag: &str| NodeType::from_tag(tag);

    let Some(start) = flow
        .nodes
        .iter()
        .find(|n| typed(&n.node_type) == Some(NodeType::Start))
    else {
        return diags;
    };

    for edge in flow.incoming(&start.id) {
        diags.push(
            Diagnostic::error("E012", "Start node has incoming edges")
                .on_node(&start.id)
                .on_edge(&edge.id),
        );
    }

    let (graph, index) = routing_graph(flow);
    let mut reachable = vec![false; graph.node_count()];
    if let Some(&start_idx) = index.get(start.id.as_str()) {
        let mut bfs = Bfs::new(&graph, start_idx);
        while let Some(nx) = bfs.next(&graph) {
            reachable[nx.index()] = true;
        }
    }
    let is_reachable = |id: &str| index.get(id).is_some_and(|ix| reachable[ix.index()]);

    for node in &flow.nodes {
        if !is_reachable(&node.id) {
            diags.push(
                Diagnostic::error("E015", format!("Unreachable node: {}", node.id)).on_node(&node.id),
            );
        }
    }

    let has_end = flow
        .nodes
        .iter()
        .any(|n| typed(&n.node_type) == Some(NodeType::End) && is_reachable(&n.id));
    if !has_end {
        diags.push(Diagnostic::error("E013", "No end node is reachable from start"));
    }

    for node in &flow.nodes {
        let outgoing = flow.outgoing(&node.id).count();
        match typed(&node.node_type) {
            Some(NodeType::End) => {
                if outgoing > 0 {
                    diags.push(
                        Diagnostic::error("E014", "End node has outgoing edges").on_node(&node.id),
                    );
                }
            }
            Some(NodeType::Decision) | None => {}
            Some(_) => {
                if outgoing == 0 {
                    diags.push(
                        Diagnostic::error("E030", format!("Node '{}' has no outgoing edge", node.id))
                            .on_node(&node.id),
                    );
                } else if outgoing > 1 {
                    diags.push(
                        Diagnostic::error(
                            "E031",
                            format!(
                                "Node '{}' has {} outgoing edges; only decision nodes may branch",
                                node.id, outgoing
                            ),
                        )
                        .on_node(&node.id),
                    );
                }
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let self_loop = component.len() == 1
            && graph
                .neighbors_directed(component[0], Direction::Outgoing)
                .any(|n| n == component[0]);
        if component.len() > 1 || self_loop {
            let mut ids: Vec<&str> = component.iter().map(|ix| graph[*ix]).collect();
            ids.sort_unstable();
            diags.push(
                Diagnostic::warning("W101", format!("Cycle detected: {}", ids.join(", ")))
                    .on_node(ids[0]),
            );
        }
    }

    diags
}
