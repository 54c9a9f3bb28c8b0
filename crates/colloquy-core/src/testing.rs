//! Fakes shared by the unit tests in this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;
use uuid::Uuid;

use colloquy_db::Database;
use colloquy_types::error::GenerationError;

use crate::generator::{Generator, PromptRole, PromptTurn};

pub(crate) fn test_db() -> (Arc<Database>, Uuid) {
    let db = Database::open_in_memory().unwrap();
    let owner = Uuid::new_v4();
    db.create_user(owner, "owner@x.com", "digest").unwrap().unwrap();
    (Arc::new(db), owner)
}

pub(crate) fn echo_last_human(prompt: &[PromptTurn]) -> String {
    let last = prompt
        .iter()
        .rev()
        .find(|turn| turn.role == PromptRole::Human)
        .map(|turn| turn.content.as_str())
        .unwrap_or_default();
    format!("Assistant: echo: {last}")
}

/// Answers synchronously with whatever the closure returns.
pub(crate) struct FnGenerator<F>(pub F);

impl<F> Generator for FnGenerator<F>
where
    F: Fn(&[PromptTurn]) -> Result<String, GenerationError> + Send + Sync,
{
    fn generate<'a>(&'a self, prompt: &'a [PromptTurn]) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(std::future::ready((self.0)(prompt)))
    }
}

/// Blocks every call until the test opens the gate, then echoes the last
/// human turn.
pub(crate) struct GatedGenerator {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn open(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Generator for GatedGenerator {
    fn generate<'a>(&'a self, prompt: &'a [PromptTurn]) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| GenerationError::ExternalFailure(e.to_string()))?;
            permit.forget();
            Ok(echo_last_human(prompt))
        })
    }
}
