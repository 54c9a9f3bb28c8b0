use std::sync::Arc;

use uuid::Uuid;

use colloquy_db::Database;
use colloquy_types::error::PersistenceError;
use colloquy_types::models::{Conversation, Role, Turn};

use crate::locks::{ConversationGuard, ConversationLocks};
use crate::run_blocking;

/// Most recent turns kept for prompting.
pub const WINDOW_CAPACITY: usize = 8;

/// Per-conversation recent-turn view backed by the database.
///
/// Every append writes the full turn to the transcript and slides the
/// persisted window in the same transaction, so the window survives
/// restarts and is shared by every process using the database. Appends and
/// window reads take a `ConversationGuard`, which makes the caller prove it
/// holds the conversation's exclusive section.
#[derive(Clone)]
pub struct SessionHistoryWindow {
    db: Arc<Database>,
    capacity: usize,
}

impl SessionHistoryWindow {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            capacity: WINDOW_CAPACITY,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create a conversation with its first user turn, already locked.
    ///
    /// The lock is claimed inside the creating transaction, so the returned
    /// guard is held from before the id becomes visible to anyone else.
    pub async fn start(
        &self,
        locks: &ConversationLocks,
        owner_id: Uuid,
        first_message: String,
    ) -> Result<(Conversation, Turn, ConversationGuard), PersistenceError> {
        let capacity = self.capacity;
        let locks = locks.clone();
        run_blocking(&self.db, move |db| {
            db.create_conversation_claimed(owner_id, &first_message, capacity, |id| locks.try_acquire(id))
        })
        .await
    }

    pub async fn append(
        &self,
        guard: &ConversationGuard,
        role: Role,
        content: String,
    ) -> Result<Turn, PersistenceError> {
        let conversation_id = guard.conversation_id();
        let capacity = self.capacity;
        run_blocking(&self.db, move |db| {
            db.append_turn(conversation_id, role, &content, capacity)
        })
        .await
    }

    /// Chronological, at most `capacity` turns, always a suffix of the
    /// transcript.
    pub async fn get_window(&self, guard: &ConversationGuard) -> Result<Vec<Turn>, PersistenceError> {
        let conversation_id = guard.conversation_id();
        run_blocking(&self.db, move |db| db.window_turns(conversation_id)).await
    }
}
