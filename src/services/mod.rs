//! External collaborators: AI inference, the knowledge base and the
//! messaging gateway. Node handlers only see these traits.

use std::sync::Arc;

use async_trait::async_trait;

pub mod error;
pub mod fake;
pub mod types;

pub use error::ServiceError;
pub use types::{
    Classification, ClassifyRequest, ClassifyTask, DeliveryReceipt, GenerateRequest,
    OutboundMessage, QaMatch,
};

/// Classifier and reply generator.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn classify(&self, request: ClassifyRequest) -> Result<Classification, ServiceError>;

    async fn generate(&self, request: GenerateRequest) -> Result<String, ServiceError>;
}

/// Question/answer lookup.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn lookup(&self, question: &str) -> Result<Option<QaMatch>, ServiceError>;
}

/// Outbound delivery of chat messages.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt, ServiceError>;
}

/// The collaborators handed to the built-in node handlers.
#[derive(Clone)]
pub struct Services {
    pub ai: Arc<dyn AiService>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub gateway: Arc<dyn MessageGateway>,
}

impl Services {
    pub fn new(
        ai: Arc<dyn AiService>,
        knowledge: Arc<dyn KnowledgeBase>,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            ai,
            knowledge,
            gateway,
        }
    }
}
