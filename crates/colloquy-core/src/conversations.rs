use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;

use colloquy_db::Database;
use colloquy_types::error::{NotFoundError, PersistenceError, ServiceError};
use colloquy_types::models::{Conversation, Role, Turn, User};

use crate::accounts::AccountService;
use crate::generator::Generator;
use crate::locks::{ConversationGuard, ConversationLocks};
use crate::run_blocking;
use crate::task::{GenerationOutcome, GenerationSettings, GenerationTask};
use crate::window::SessionHistoryWindow;

/// Create/add/list over conversations.
///
/// The two write paths schedule generation differently:
/// `create_conversation` returns as soon as the user turn is stored and lets
/// the reply arrive later, while `add_message` waits for the reply and
/// returns it.
#[derive(Clone)]
pub struct ConversationService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    accounts: AccountService,
    window: SessionHistoryWindow,
    locks: ConversationLocks,
    generator: Arc<dyn Generator>,
    settings: Arc<GenerationSettings>,
}

impl ConversationService {
    pub fn new(
        db: Arc<Database>,
        accounts: AccountService,
        generator: Arc<dyn Generator>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                window: SessionHistoryWindow::new(db.clone()),
                db,
                accounts,
                locks: ConversationLocks::new(),
                generator,
                settings: Arc::new(settings),
            }),
        }
    }

    /// Store the first user turn and schedule the reply without waiting.
    pub async fn create_conversation(
        &self,
        access_token: Option<&str>,
        first_message: &str,
    ) -> Result<i64, ServiceError> {
        let user = self.inner.accounts.authenticate(access_token).await?;
        let content = require_content(first_message)?;

        // Creation and generation run in their own task: once the first turn
        // is stored, its reply gets written even if this caller goes away.
        let (id_tx, id_rx) = oneshot::channel();
        tokio::spawn(self.clone().start_and_generate(user.id, content, id_tx));

        let conversation_id = id_rx
            .await
            .map_err(|_| ServiceError::Internal("conversation setup was abandoned".into()))??;

        info!("User {} started conversation {}", user.id, conversation_id);
        Ok(conversation_id)
    }

    /// Store a user turn, run generation to completion, and return the
    /// assistant turn it produced (a reply or a failure description).
    pub async fn add_message(
        &self,
        access_token: Option<&str>,
        conversation_id: i64,
        content: &str,
    ) -> Result<Turn, ServiceError> {
        let user = self.inner.accounts.authenticate(access_token).await?;
        self.owned_conversation(&user, conversation_id).await?;
        let content = require_content(content)?;

        // Dropping the handle detaches the task without cancelling it.
        let outcome = tokio::spawn(self.clone().append_and_generate(conversation_id, content))
            .await
            .map_err(|e| {
                error!("Generation for conversation {} did not finish: {}", conversation_id, e);
                ServiceError::Internal(e.to_string())
            })??;

        Ok(outcome.turn)
    }

    /// The full transcript, oldest first.
    pub async fn list_messages(
        &self,
        access_token: Option<&str>,
        conversation_id: i64,
    ) -> Result<Vec<Turn>, ServiceError> {
        let user = self.inner.accounts.authenticate(access_token).await?;
        self.owned_conversation(&user, conversation_id).await?;

        let turns = run_blocking(&self.inner.db, move |db| db.list_turns(conversation_id)).await?;
        Ok(turns)
    }

    /// Conversations belonging to someone else are reported as missing.
    async fn owned_conversation(&self, user: &User, conversation_id: i64) -> Result<Conversation, ServiceError> {
        let conversation = run_blocking(&self.inner.db, move |db| db.get_conversation(conversation_id))
            .await?
            .filter(|c| c.owner_id == user.id)
            .ok_or(NotFoundError::Conversation(conversation_id))?;
        Ok(conversation)
    }

    async fn start_and_generate(
        self,
        owner_id: Uuid,
        content: String,
        id_tx: oneshot::Sender<Result<i64, PersistenceError>>,
    ) {
        let (conversation, user_turn, guard) =
            match self.inner.window.start(&self.inner.locks, owner_id, content).await {
                Ok(started) => started,
                Err(e) => {
                    let _ = id_tx.send(Err(e));
                    return;
                }
            };
        let _ = id_tx.send(Ok(conversation.id));

        if let Err(e) = self.task(guard, user_turn).run().await {
            error!("Background generation for conversation {} was lost: {}", conversation.id, e);
        }
    }

    async fn append_and_generate(
        self,
        conversation_id: i64,
        content: String,
    ) -> Result<GenerationOutcome, PersistenceError> {
        let guard = self.inner.locks.acquire(conversation_id).await;
        let user_turn = self.inner.window.append(&guard, Role::User, content).await?;
        self.task(guard, user_turn).run().await
    }

    fn task(&self, guard: ConversationGuard, user_turn: Turn) -> GenerationTask {
        GenerationTask::new(
            guard,
            user_turn,
            self.inner.window.clone(),
            Arc::clone(&self.inner.generator),
            Arc::clone(&self.inner.settings),
        )
    }
}

fn require_content(raw: &str) -> Result<String, ServiceError> {
    if raw.trim().is_empty() {
        return Err(ServiceError::InvalidInput("message content must not be empty".into()));
    }
    Ok(raw.to_string())
}
