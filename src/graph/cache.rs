use std::sync::Arc;

use dashmap::DashMap;

use crate::dsl::schema::FlowDefinition;
use crate::error::WorkflowError;
use crate::nodes::NodeExecutorRegistry;

use super::builder::build_flow_graph;
use super::types::FlowGraph;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    pub flow_id: String,
    pub version: String,
}

/// Validated graphs keyed by `(flow id, version)`.
#[derive(Default)]
pub struct FlowGraphCache {
    graphs: DashMap<CacheKey, Arc<FlowGraph>>,
}

impl FlowGraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached graph for this flow version, building it on a miss.
    /// Failed builds are not cached.
    pub fn get_or_build(
        &self,
        flow: &FlowDefinition,
        registry: &NodeExecutorRegistry,
    ) -> Result<Arc<FlowGraph>, WorkflowError> {
        let key = CacheKey {
            flow_id: flow.id.clone(),
            version: flow.version.clone(),
        };
        if let Some(graph) = self.graphs.get(&key) {
            return Ok(graph.clone());
        }
        let graph = Arc::new(build_flow_graph(flow, registry)?);
        Ok(self.graphs.entry(key).or_insert(graph).clone())
    }

    pub fn get(&self, flow_id: &str, version: &str) -> Option<Arc<FlowGraph>> {
        self.graphs
            .get(&CacheKey {
                flow_id: flow_id.to_string(),
                version: version.to_string(),
            })
            .map(|g| g.clone())
    }

    /// Drop every cached version of a flow.
    pub fn invalidate(&self, flow_id: &str) {
        self.graphs.retain(|k, _| k.flow_id != flow_id);
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
