use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;

use crate::chat_client::{ChatError, ChatReply};
use crate::provider::Provider;
use crate::types::{ChatMessage, PredictionResult};

/// Static description of the loaded classifier, reported by `/health`.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub device: String,
    pub model_repo: String,
    pub model_file: String,
    pub image_size: u32,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, image: DynamicImage) -> Result<PredictionResult>;

    fn info(&self) -> ModelInfo;
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        provider: Provider,
        user_message: &str,
        history: &[ChatMessage],
        prediction: Option<&PredictionResult>,
    ) -> Result<ChatReply, ChatError>;
}
