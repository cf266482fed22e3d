use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::runtime_context::TimeProvider;

/// Drops redelivered messages: a `(robotId, msgId)` pair seen within the
/// window is rejected.
pub struct MessageDeduplicator {
    seen: DashMap<String, i64>,
    window_secs: u64,
    clock: Arc<dyn TimeProvider>,
}

impl MessageDeduplicator {
    pub fn new(window_secs: u64, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            seen: DashMap::new(),
            window_secs,
            clock,
        }
    }

    /// Record `msg_id` for `robot_id`; false if the pair was already seen
    /// inside the window. Events without a message id always pass.
    pub fn check_and_record(&self, robot_id: &str, msg_id: &str) -> bool {
        if msg_id.is_empty() {
            return true;
        }
        let now = self.clock.now_timestamp();
        match self.seen.entry(format!("{}:{}", robot_id, msg_id)) {
            Entry::Occupied(mut e) => {
                if self.clock.elapsed_secs(*e.get()) < self.window_secs {
                    false
                } else {
                    e.insert(now);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        }
    }

    /// Forget ids older than the window; returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, seen_at| self.clock.elapsed_secs(*seen_at) < self.window_secs);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
