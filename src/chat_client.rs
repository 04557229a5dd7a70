use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::ChatBackend;
use crate::prompt::build_messages;
use crate::provider::Provider;
use crate::types::{ChatMessage, PredictionResult};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Unknown provider or missing credentials.
    #[error("{0}")]
    Config(String),

    /// Transport failure or an unusable provider response.
    #[error("chat provider request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Request(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub model: String,
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Relays one conversation turn to an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    params: GenerationParams,
    env: EnvLookup,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl ChatClient {
    /// Credentials are read from the process environment on every request.
    pub fn new(params: GenerationParams) -> Self {
        Self::with_env(params, Arc::new(|name: &str| std::env::var(name).ok()))
    }

    pub fn with_env(params: GenerationParams, env: EnvLookup) -> Self {
        Self {
            http: reqwest::Client::new(),
            params,
            env,
        }
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    #[tracing::instrument(skip_all, fields(provider = ?provider, history_len = history.len()))]
    async fn chat(
        &self,
        provider: Provider,
        user_message: &str,
        history: &[ChatMessage],
        prediction: Option<&PredictionResult>,
    ) -> Result<ChatReply, ChatError> {
        let settings = provider.resolve(self.env.as_ref())?;
        let messages = build_messages(user_message, history, prediction);

        let url = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        tracing::debug!(%url, model = %settings.model, messages = messages.len(), "Sending chat completion");

        let response: CompletionResponse = self
            .http
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&CompletionRequest {
                model: &settings.model,
                messages: &messages,
                temperature: self.params.temperature,
                max_tokens: self.params.max_tokens,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Request("provider returned no choices".to_string()))?;
        let reply = choice.message.content.unwrap_or_default().trim().to_string();

        tracing::info!(reply_chars = reply.len(), "Chat completion received");
        Ok(ChatReply {
            reply,
            model: settings.model,
        })
    }
}
