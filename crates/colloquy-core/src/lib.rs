//! Conversation engine: credential lifecycle, per-conversation history
//! windows, and the generation pipeline that turns a user turn into exactly
//! one assistant turn.

pub mod accounts;
pub mod conversations;
pub mod generator;
pub mod locks;
pub mod refresh;
pub mod sanitize;
pub mod task;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::error;

use colloquy_db::Database;
use colloquy_types::error::PersistenceError;

pub use accounts::{AccountService, Session};
pub use conversations::ConversationService;
pub use generator::{Generator, HttpGenerator, HttpGeneratorConfig, PromptRole, PromptTurn};
pub use task::{FAILURE_PREFIX, GenerationSettings, TaskState};

/// Run blocking SQLite work off the async runtime.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, PersistenceError>
where
    F: FnOnce(&Database) -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            PersistenceError::CommitFailure(format!("storage task failed: {e}"))
        })?
}
