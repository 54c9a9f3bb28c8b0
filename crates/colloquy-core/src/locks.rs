use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<i64, Arc<AsyncMutex<()>>>;

/// Key-scoped exclusive sections, one per conversation.
///
/// Different conversations never contend. Waiters on the same conversation
/// are served in arrival order (tokio's mutex is fair), which is what keeps
/// turn order equal to submission order.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Exclusive access to one conversation. Owned, so it can move into a
/// spawned task; released on drop.
pub struct ConversationGuard {
    conversation_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    locks: ConversationLocks,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: i64) -> ConversationGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(conversation_id).or_default())
        };

        let guard = lock.lock_owned().await;
        ConversationGuard {
            conversation_id,
            guard: Some(guard),
            locks: self.clone(),
        }
    }

    /// Take the conversation's lock only if nobody holds or waits for it.
    /// Never blocks, so it can run inside a storage transaction.
    pub fn try_acquire(&self, conversation_id: i64) -> Option<ConversationGuard> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(map.entry(conversation_id).or_default());
        let guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return None,
        };
        drop(map);

        Some(ConversationGuard {
            conversation_id,
            guard: Some(guard),
            locks: self.clone(),
        })
    }

    /// Number of conversations with a holder or waiter.
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ConversationGuard {
    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the Arc under the map lock, so a count of one here
        // means nobody else holds or waits for this entry.
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = map
            .get(&self.conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            map.remove(&self.conversation_id);
        }
    }
}
