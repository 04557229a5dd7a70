use clap::Parser;

use crate::chat_client::GenerationParams;
use crate::model_service::ModelConfig;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "7860")]
    pub port: u16,

    /// Model repository on Hugging Face Hub
    #[arg(long, env = "MODEL_REPO", default_value = "Arko007/cardiac-mri-cnn")]
    pub model_repo: String,

    /// Checkpoint file inside the model repository
    #[arg(long, env = "MODEL_FILE", default_value = "best_model_epoch20_auc0.8129.pt")]
    pub model_file: String,

    /// Square input size the checkpoint was trained on
    #[arg(long, env = "IMAGE_SIZE", default_value = "896")]
    pub image_size: u32,

    /// Decision threshold override; ignored when it is not a number in [0, 1]
    #[arg(long, env = "OPTIMAL_THRESHOLD")]
    pub optimal_threshold: Option<String>,

    /// Access token for private model repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Load the model in the background at startup instead of on the first request
    #[arg(long, env = "PRELOAD_MODEL")]
    pub preload: bool,

    /// Allowed CORS origins: "*" or a comma separated list
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Sampling temperature sent to the chat provider
    #[arg(long, env = "LLM_TEMPERATURE", default_value = "0.2")]
    pub llm_temperature: f32,

    /// Completion token limit sent to the chat provider
    #[arg(long, env = "LLM_MAX_TOKENS", default_value = "500")]
    pub llm_max_tokens: u32,

    /// Maximum accepted upload size in megabytes
    #[arg(long, env = "MAX_UPLOAD_MB", default_value = "20")]
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            repo_id: self.model_repo.clone(),
            filename: self.model_file.clone(),
            image_size: self.image_size,
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }

    pub fn parse_cors_origins(&self) -> CorsOrigins {
        let raw = self.cors_origins.trim();
        if raw == "*" {
            return CorsOrigins::Any;
        }
        CorsOrigins::List(
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
