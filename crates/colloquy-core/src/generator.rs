use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use colloquy_types::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    Human,
    Assistant,
}

impl PromptRole {
    /// The line prefix used when a prompt is rendered as plain text. The
    /// sanitizer searches model output for these same markers.
    pub const fn marker(self) -> &'static str {
        match self {
            Self::System => "System:",
            Self::Human => "Human:",
            Self::Assistant => "Assistant:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTurn {
    pub role: PromptRole,
    pub content: String,
}

impl PromptTurn {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// External text-generation capability.
///
/// Latency is unbounded and calls may fail; callers apply their own timeout.
pub trait Generator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a [PromptTurn]) -> BoxFuture<'a, Result<String, GenerationError>>;
}

/// Render prompt turns as a completion-style transcript that ends with an
/// open assistant line.
pub fn render_prompt(prompt: &[PromptTurn]) -> String {
    let mut text = String::new();
    for turn in prompt {
        text.push_str(turn.role.marker());
        text.push(' ');
        text.push_str(&turn.content);
        text.push('\n');
    }
    text.push_str(PromptRole::Assistant.marker());
    text
}

#[derive(Debug, Clone)]
pub struct HttpGeneratorConfig {
    pub url: String,
    pub api_token: Option<String>,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

/// Generator backed by a text-generation inference endpoint
/// (`{"inputs": .., "parameters": ..}` in, `generated_text` out).
///
/// The client is built without a request timeout; the generation task owns
/// the deadline.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: HttpGeneratorConfig,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batch(Vec<GeneratedText>),
    Single(GeneratedText),
}

impl HttpGenerator {
    pub fn new(config: HttpGeneratorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    async fn call(&self, prompt: &[PromptTurn]) -> Result<String, GenerationError> {
        let inputs = render_prompt(prompt);
        let body = InferenceRequest {
            inputs: &inputs,
            parameters: InferenceParameters {
                max_new_tokens: self.config.max_new_tokens,
                temperature: self.config.temperature,
                return_full_text: false,
            },
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::ExternalFailure(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(GenerationError::ExternalFailure(format!(
                "endpoint returned {status}: {detail}"
            )));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::ExternalFailure(format!("unreadable response: {e}")))?;

        let text = match parsed {
            InferenceResponse::Batch(mut items) if !items.is_empty() => items.swap_remove(0).generated_text,
            InferenceResponse::Batch(_) => {
                return Err(GenerationError::ExternalFailure("empty response".into()));
            }
            InferenceResponse::Single(item) => item.generated_text,
        };

        debug!("Generator returned {} bytes", text.len());
        Ok(text)
    }
}

impl Generator for HttpGenerator {
    fn generate<'a>(&'a self, prompt: &'a [PromptTurn]) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(self.call(prompt))
    }
}
