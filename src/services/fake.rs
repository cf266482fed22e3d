//! Deterministic collaborators for tests and the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    AiService, Classification, ClassifyRequest, ClassifyTask, DeliveryReceipt, GenerateRequest,
    KnowledgeBase, MessageGateway, OutboundMessage, QaMatch, ServiceError, Services,
};
use crate::alert::notify::{NotificationMessage, Notifier};
use crate::alert::types::NotificationMethod;
use crate::error::AlertError;

pub const DEFAULT_FAKE_REPLY: &str = "您好，请问有什么可以帮您？";

/// Default services: chat intent, no knowledge hits, recording gateway.
pub fn services() -> Services {
    Services::new(
        Arc::new(FakeAiService::new()),
        Arc::new(FakeKnowledgeBase::new()),
        Arc::new(RecordingGateway::new()),
    )
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Keyword-driven classifier with a fixed reply.
pub struct FakeAiService {
    defaults: HashMap<ClassifyTask, Classification>,
    rules: Vec<(String, ClassifyTask, Classification)>,
    reply: String,
    generate_failures: AtomicU32,
    generate_delay: Option<Duration>,
    classify_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl FakeAiService {
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(ClassifyTask::Intent, Classification::intent("chat", 0.9));
        defaults.insert(
            ClassifyTask::Emotion,
            Classification::intent("chat", 0.9).with_emotion("neutral"),
        );
        defaults.insert(
            ClassifyTask::Risk,
            Classification::intent("chat", 0.9).with_risk("low"),
        );
        Self {
            defaults,
            rules: Vec::new(),
            reply: DEFAULT_FAKE_REPLY.to_string(),
            generate_failures: AtomicU32::new(0),
            generate_delay: None,
            classify_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Texts containing `keyword` classify as `result` for `task`.
    pub fn with_rule(mut self, keyword: &str, task: ClassifyTask, result: Classification) -> Self {
        self.rules.push((keyword.to_string(), task, result));
        self
    }

    pub fn with_default(mut self, task: ClassifyTask, result: Classification) -> Self {
        self.defaults.insert(task, result);
        self
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// The next `n` generate calls fail with a transient error.
    pub fn failing_generate(self, n: u32) -> Self {
        self.generate_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = Some(delay);
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeAiService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiService for FakeAiService {
    async fn classify(&self, request: ClassifyRequest) -> Result<Classification, ServiceError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let hit = self
            .rules
            .iter()
            .find(|(keyword, task, _)| *task == request.task && request.text.contains(keyword.as_str()))
            .map(|(_, _, c)| c.clone());
        hit.or_else(|| self.defaults.get(&request.task).cloned())
            .ok_or_else(|| ServiceError::Rejected(format!("no classifier for {:?}", request.task)))
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<String, ServiceError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        if take_one(&self.generate_failures) {
            return Err(ServiceError::Unavailable("fake outage".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// Answers questions containing a registered keyword.
#[derive(Default)]
pub struct FakeKnowledgeBase {
    entries: Vec<QaMatch>,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, keyword: &str, answer: &str, score: f64) -> Self {
        self.entries.push(QaMatch {
            question: keyword.to_string(),
            answer: answer.to_string(),
            score,
        });
        self
    }
}

#[async_trait]
impl KnowledgeBase for FakeKnowledgeBase {
    async fn lookup(&self, question: &str) -> Result<Option<QaMatch>, ServiceError> {
        Ok(self
            .entries
            .iter()
            .find(|e| question.contains(e.question.as_str()))
            .cloned())
    }
}

/// Keeps every outbound message.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    seq: AtomicU64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt, ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("gateway down".to_string()));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().push(message);
        Ok(DeliveryReceipt {
            delivery_id: format!("delivery-{}", n),
            accepted: true,
        })
    }
}

/// Notifier that records deliveries; can be told to fail.
pub struct RecordingNotifier {
    method_type: String,
    calls: Mutex<Vec<(String, NotificationMessage)>>,
    failures: AtomicU32,
    always_fail: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new(method_type: &str) -> Self {
        Self {
            method_type: method_type.to_string(),
            calls: Mutex::new(Vec::new()),
            failures: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            delay: None,
        }
    }

    /// The next `n` deliveries fail.
    pub fn failing_times(self, n: u32) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(method id, message)` per successful delivery, in completion order.
    pub fn deliveries(&self) -> Vec<(String, NotificationMessage)> {
        self.calls.lock().clone()
    }

    pub fn delivered_method_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn method_type(&self) -> &str {
        &self.method_type
    }

    async fn send(
        &self,
        method: &NotificationMethod,
        message: &NotificationMessage,
    ) -> Result<(), AlertError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) || take_one(&self.failures) {
            return Err(AlertError::Dispatch {
                method: method.id.clone(),
                message: "recording notifier configured to fail".to_string(),
            });
        }
        self.calls.lock().push((method.id.clone(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: ClassifyTask, text: &str) -> ClassifyRequest {
        ClassifyRequest {
            task,
            text: text.to_string(),
            session_id: None,
            labels: vec![],
            prompt: None,
        }
    }

    #[tokio::test]
    async fn test_fake_ai_rules_and_defaults() {
        let ai = FakeAiService::new().with_rule(
            "投诉",
            ClassifyTask::Intent,
            Classification::intent("投诉", 0.95).with_emotion("angry"),
        );
        let hit = ai.classify(request(ClassifyTask::Intent, "我要投诉")).await.unwrap();
        assert_eq!(hit.intent, "投诉");
        let miss = ai.classify(request(ClassifyTask::Intent, "你好")).await.unwrap();
        assert_eq!(miss.intent, "chat");
        assert_eq!(ai.classify_calls(), 2);
    }

    #[tokio::test]
    async fn test_fake_ai_transient_failures() {
        let ai = FakeAiService::new().failing_generate(1);
        let req = GenerateRequest {
            prompt: "hi".into(),
            session_id: None,
            context: Default::default(),
        };
        assert!(ai.generate(req.clone()).await.is_err());
        assert_eq!(ai.generate(req).await.unwrap(), DEFAULT_FAKE_REPLY);
    }

    #[tokio::test]
    async fn test_recording_gateway() {
        let gw = RecordingGateway::new();
        let receipt = gw
            .send(OutboundMessage {
                target: "g".into(),
                message_body: "hi".into(),
                at_list: vec![],
                robot_id: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.delivery_id, "delivery-1");
        gw.set_failing(true);
        assert!(gw
            .send(OutboundMessage {
                target: "g".into(),
                message_body: "again".into(),
                at_list: vec![],
                robot_id: None,
            })
            .await
            .is_err());
        assert_eq!(gw.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_base_lookup() {
        let kb = FakeKnowledgeBase::new().with_entry("营业时间", "9:00-18:00", 0.92);
        assert_eq!(kb.lookup("请问营业时间是？").await.unwrap().unwrap().answer, "9:00-18:00");
        assert!(kb.lookup("你好").await.unwrap().is_none());
    }
}
