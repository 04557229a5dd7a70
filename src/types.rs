use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const MAX_HISTORY_CONTENT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Sick,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Normal => f.write_str("Normal"),
            Label::Sick => f.write_str("Sick"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: Label,
    pub is_sick: bool,
    pub prob_sick: f64,
    pub prob_normal: f64,
    pub threshold: f64,
    pub model_repo: String,
    pub model_file: String,
    pub image_size: u32,
    pub inference_ms: u64,
}

impl PredictionResult {
    fn validate(&self) -> Result<(), ApiError> {
        for (name, value) in [
            ("prob_sick", self.prob_sick),
            ("prob_normal", self.prob_normal),
            ("threshold", self.threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ApiError::BadRequest(format!(
                    "prediction.{name} must be between 0 and 1"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub prediction: Option<PredictionResult>,
}

fn default_provider() -> String {
    "groq".to_string()
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    let chars = value.chars().count();
    if chars == 0 {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    if chars > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

impl ChatRequest {
    /// Enforces the request limits before anything reaches the provider.
    pub fn validate(&self) -> Result<(), ApiError> {
        check_length("message", &self.message, MAX_MESSAGE_CHARS)?;
        for (index, entry) in self.history.iter().enumerate() {
            check_length(
                &format!("history[{index}].content"),
                &entry.content,
                MAX_HISTORY_CONTENT_CHARS,
            )?;
        }
        if let Some(prediction) = &self.prediction {
            prediction.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub provider: String,
    pub model: String,
    pub disclaimer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub prediction: PredictionResult,
    pub disclaimer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
    pub model_repo: String,
    pub model_file: String,
    pub image_size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub health: String,
}
