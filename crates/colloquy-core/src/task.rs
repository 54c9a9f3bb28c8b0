use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use colloquy_types::error::{GenerationError, PersistenceError};
use colloquy_types::models::{Role, Turn};

use crate::generator::{Generator, PromptRole, PromptTurn};
use crate::locks::ConversationGuard;
use crate::sanitize::sanitize;
use crate::window::SessionHistoryWindow;

/// Every failure turn starts with this text.
pub const FAILURE_PREFIX: &str = "Sorry, I couldn't generate a reply:";

pub const DEFAULT_INSTRUCTIONS: &str = "The following is a friendly conversation between a human and an AI. \
The AI is talkative and provides lots of specific details from its context. \
If the AI does not know the answer to a question, it truthfully says it does not know.";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Upper bound on a single generator call.
    pub timeout: Duration,
    /// System preamble placed at the head of every prompt.
    pub instructions: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub state: TaskState,
    pub turn: Turn,
}

pub fn failure_message(err: &GenerationError) -> String {
    format!("{FAILURE_PREFIX} {err}.")
}

/// One generation attempt for one user turn.
///
/// Holds the conversation's guard for its whole life, so a later message to
/// the same conversation waits until this task has written its reply. Once
/// running, the task always ends by appending exactly one assistant turn:
/// the sanitized reply, or a failure description.
pub struct GenerationTask {
    guard: ConversationGuard,
    user_turn: Turn,
    window: SessionHistoryWindow,
    generator: Arc<dyn Generator>,
    settings: Arc<GenerationSettings>,
    state: TaskState,
}

impl GenerationTask {
    pub fn new(
        guard: ConversationGuard,
        user_turn: Turn,
        window: SessionHistoryWindow,
        generator: Arc<dyn Generator>,
        settings: Arc<GenerationSettings>,
    ) -> Self {
        Self {
            guard,
            user_turn,
            window,
            generator,
            settings,
            state: TaskState::Scheduled,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub async fn run(mut self) -> Result<GenerationOutcome, PersistenceError> {
        let conversation_id = self.guard.conversation_id();
        self.state = TaskState::Running;
        debug!("Generation running for conversation {}", conversation_id);

        let (content, terminal) = match self.attempt().await {
            Ok(reply) => (reply, TaskState::Succeeded),
            Err(e) => {
                warn!("Generation failed for conversation {}: {}", conversation_id, e);
                (failure_message(&e), TaskState::Failed)
            }
        };

        let turn = self
            .window
            .append(&self.guard, Role::Assistant, content)
            .await
            .map_err(|e| {
                error!(
                    "Could not store assistant turn for conversation {}: {}",
                    conversation_id, e
                );
                e
            })?;

        self.state = terminal;
        info!(
            "Generation for conversation {} finished as {:?} (turn {})",
            conversation_id, terminal, turn.id
        );
        Ok(GenerationOutcome {
            state: terminal,
            turn,
        })
    }

    async fn attempt(&self) -> Result<String, GenerationError> {
        let history = self
            .window
            .get_window(&self.guard)
            .await
            .map_err(|e| GenerationError::ExternalFailure(format!("history unavailable: {e}")))?;
        let prompt = build_prompt(&self.settings.instructions, &history, &self.user_turn);

        // The call runs on its own task so a panicking generator becomes an
        // ordinary failure instead of taking this task down with it.
        let generator = Arc::clone(&self.generator);
        let mut call = tokio::spawn(async move { generator.generate(&prompt).await });

        let raw = match tokio::time::timeout(self.settings.timeout, &mut call).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) if join_err.is_panic() => {
                return Err(GenerationError::ExternalFailure("generator panicked".into()));
            }
            Ok(Err(join_err)) => {
                return Err(GenerationError::ExternalFailure(join_err.to_string()));
            }
            Err(_) => {
                call.abort();
                return Err(GenerationError::Timeout(self.settings.timeout));
            }
        };

        sanitize(&raw, &self.settings.instructions)
    }
}

/// System instructions, then the window, then the new user turn. The window
/// already contains the new turn; it is not repeated.
pub fn build_prompt(instructions: &str, history: &[Turn], user_turn: &Turn) -> Vec<PromptTurn> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptTurn::new(PromptRole::System, instructions));

    prompt.extend(
        history
            .iter()
            .filter(|turn| turn.id != user_turn.id)
            .map(|turn| PromptTurn::new(prompt_role(turn.role), turn.content.clone())),
    );

    prompt.push(PromptTurn::new(PromptRole::Human, user_turn.content.clone()));
    prompt
}

fn prompt_role(role: Role) -> PromptRole {
    match role {
        Role::User => PromptRole::Human,
        Role::Assistant => PromptRole::Assistant,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::locks::ConversationLocks;
    use crate::testing::{FnGenerator, GatedGenerator, echo_last_human, test_db};

    struct Fixture {
        window: SessionHistoryWindow,
        locks: ConversationLocks,
        conversation_id: i64,
        first_turn: Turn,
    }

    async fn fixture() -> Fixture {
        let (db, owner) = test_db();
        let window = SessionHistoryWindow::new(db);
        let locks = ConversationLocks::new();
        let (conversation, first_turn, _guard) = window.start(&locks, owner, "hi".into()).await.unwrap();
        Fixture {
            window,
            locks,
            conversation_id: conversation.id,
            first_turn,
        }
    }

    async fn run_with(
        fx: &Fixture,
        generator: Arc<dyn Generator>,
        settings: GenerationSettings,
    ) -> GenerationOutcome {
        let guard = fx.locks.acquire(fx.conversation_id).await;
        let task = GenerationTask::new(
            guard,
            fx.first_turn.clone(),
            fx.window.clone(),
            generator,
            Arc::new(settings),
        );
        assert_eq!(task.state(), TaskState::Scheduled);
        task.run().await.unwrap()
    }

    async fn transcript(fx: &Fixture) -> Vec<Turn> {
        let guard = fx.locks.acquire(fx.conversation_id).await;
        fx.window.get_window(&guard).await.unwrap()
    }

    #[tokio::test]
    async fn success_stores_sanitized_reply() {
        let fx = fixture().await;
        let generator = Arc::new(FnGenerator(|prompt: &[PromptTurn]| Ok(echo_last_human(prompt))));

        let outcome = run_with(&fx, generator, GenerationSettings::default()).await;

        assert_eq!(outcome.state, TaskState::Succeeded);
        assert_eq!(outcome.turn.role, Role::Assistant);
        assert_eq!(outcome.turn.content, "echo: hi");
        assert_eq!(transcript(&fx).await.len(), 2);
    }

    #[tokio::test]
    async fn generator_error_becomes_failure_turn() {
        let fx = fixture().await;
        let generator = Arc::new(FnGenerator(|_: &[PromptTurn]| {
            Err(GenerationError::ExternalFailure("model offline".into()))
        }));

        let outcome = run_with(&fx, generator, GenerationSettings::default()).await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert!(outcome.turn.content.starts_with(FAILURE_PREFIX));
        assert!(outcome.turn.content.contains("model offline"));
        assert_eq!(transcript(&fx).await.len(), 2);
    }

    #[tokio::test]
    async fn panicking_generator_becomes_failure_turn() {
        let fx = fixture().await;
        let generator = Arc::new(FnGenerator(|_: &[PromptTurn]| -> Result<String, GenerationError> {
            panic!("boom")
        }));

        let outcome = run_with(&fx, generator, GenerationSettings::default()).await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(
            outcome.turn.content,
            failure_message(&GenerationError::ExternalFailure("generator panicked".into()))
        );
    }

    #[tokio::test]
    async fn slow_generator_times_out() {
        let fx = fixture().await;
        let gated = GatedGenerator::new();
        let settings = GenerationSettings {
            timeout: Duration::from_millis(50),
            ..GenerationSettings::default()
        };

        let outcome = run_with(&fx, gated.clone(), settings).await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(
            outcome.turn.content,
            failure_message(&GenerationError::Timeout(Duration::from_millis(50)))
        );
        assert_eq!(gated.calls(), 1);
        assert_eq!(transcript(&fx).await.len(), 2);
    }

    #[tokio::test]
    async fn unusable_output_becomes_failure_turn() {
        let fx = fixture().await;
        let generator = Arc::new(FnGenerator(|_: &[PromptTurn]| Ok("Human: \nAssistant:   ".to_string())));

        let outcome = run_with(&fx, generator, GenerationSettings::default()).await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(
            outcome.turn.content,
            failure_message(&GenerationError::SanitizationFailure)
        );
    }

    #[tokio::test]
    async fn prompt_is_instructions_window_then_user_turn() {
        let fx = fixture().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let generator = Arc::new(FnGenerator(move |prompt: &[PromptTurn]| {
            sink.lock().unwrap().push(prompt.to_vec());
            Ok("fine".to_string())
        }));
        let settings = GenerationSettings {
            instructions: "Be brief.".into(),
            ..GenerationSettings::default()
        };

        run_with(&fx, generator, settings).await;

        let prompts = seen.lock().unwrap();
        assert_eq!(
            prompts[0],
            vec![
                PromptTurn::new(PromptRole::System, "Be brief."),
                PromptTurn::new(PromptRole::Human, "hi"),
            ]
        );
    }

    #[test]
    fn prompt_keeps_prior_window_in_order() {
        let at = chrono::Utc::now();
        let turn = |id: i64, role: Role, content: &str| Turn {
            id,
            conversation_id: 1,
            role,
            content: content.into(),
            created_at: at,
        };
        let history = vec![
            turn(1, Role::User, "a"),
            turn(2, Role::Assistant, "b"),
            turn(3, Role::User, "c"),
        ];

        let prompt = build_prompt("sys", &history, &history[2]);
        let rendered: Vec<(PromptRole, &str)> =
            prompt.iter().map(|p| (p.role, p.content.as_str())).collect();
        assert_eq!(
            rendered,
            [
                (PromptRole::System, "sys"),
                (PromptRole::Human, "a"),
                (PromptRole::Assistant, "b"),
                (PromptRole::Human, "c"),
            ]
        );
    }
}
