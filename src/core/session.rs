use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// At most one active run per session. Waiters are served in arrival order
/// (tokio's mutex is FIFO-fair); different sessions never block each other.
#[derive(Clone, Default)]
pub struct SessionSerializer {
    locks: LockTable,
}

/// Held for the duration of a run. Dropping it admits the next waiter.
pub struct SessionPermit {
    session_id: String,
    locks: LockTable,
    _guard: OwnedMutexGuard<()>,
}

impl SessionSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> SessionPermit {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        SessionPermit {
            session_id: session_id.to_string(),
            locks: self.locks.clone(),
            _guard: guard,
        }
    }

    /// Sessions with a running or queued run.
    pub fn active_sessions(&self) -> usize {
        self.locks.len()
    }
}

impl SessionPermit {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        // Table entry + our guard: nobody else is queued.
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
