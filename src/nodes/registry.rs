use std::collections::HashMap;
use std::sync::Arc;

use super::{alert_save, classify, control_flow, message, reply};
use super::{NodeExecutor, NodeType};
use crate::services::Services;

/// 节点注册表 - 管理所有节点类型的执行器
#[derive(Clone, Default)]
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self::default()
    }

    /// 创建并初始化内置节点
    pub fn with_builtins(services: &Services) -> Self {
        let mut registry = Self::empty();

        // 控制流节点
        registry.register(Arc::new(control_flow::StartNodeExecutor));
        registry.register(Arc::new(control_flow::DecisionNodeExecutor));
        registry.register(Arc::new(control_flow::EndNodeExecutor));

        // 消息节点
        registry.register(Arc::new(message::MessageReceiveExecutor));
        registry.register(Arc::new(message::SessionCreateExecutor));
        registry.register(Arc::new(message::SendCommandExecutor::new(
            services.gateway.clone(),
        )));

        // 识别节点
        registry.register(Arc::new(classify::QaMatchExecutor::new(
            services.knowledge.clone(),
        )));
        registry.register(Arc::new(classify::IntentExecutor::new(services.ai.clone())));
        registry.register(Arc::new(classify::EmotionAnalyzeExecutor::new(
            services.ai.clone(),
        )));
        registry.register(Arc::new(classify::RiskDetectExecutor::new(services.ai.clone())));

        // 回复与转人工
        registry.register(Arc::new(reply::AiReplyExecutor::new(services.ai.clone())));
        registry.register(Arc::new(reply::StaffInterventionExecutor));
        registry.register(Arc::new(alert_save::AlertSaveExecutor));

        registry
    }

    /// 注册节点执行器，同类型覆盖
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.node_type(), executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type)
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    pub fn registered_types(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.executors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
