use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{Module, VarBuilder};
use image::DynamicImage;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

use crate::densenet::{DenseNet, DenseNetConfig};
use crate::engine::{Classifier, ModelInfo};
use crate::hub::ArtifactFetcher;
use crate::preprocess::image_to_tensor;
use crate::types::{Label, PredictionResult};

pub const DEPLOYMENT_CONFIG_FILE: &str = "deployment_config.json";
pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub repo_id: String,
    pub filename: String,
    pub image_size: u32,
}

#[derive(Debug, Deserialize)]
struct DeploymentConfig {
    optimal_threshold: Option<f64>,
}

/// Where the decision threshold was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdSource {
    Override,
    DeploymentConfig,
    Fallback,
}

/// `is_sick` is strictly `prob_sick > threshold`.
pub fn decide(prob_sick: f64, threshold: f64) -> (Label, bool) {
    let is_sick = prob_sick > threshold;
    let label = if is_sick { Label::Sick } else { Label::Normal };
    (label, is_sick)
}

fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| (0.0..=1.0).contains(value))
}

/// Strips the `module.` prefix `DataParallel` training leaves on every name.
fn normalize_names(tensors: impl IntoIterator<Item = (String, Tensor)>) -> HashMap<String, Tensor> {
    tensors
        .into_iter()
        .map(|(name, tensor)| {
            let name = match name.strip_prefix("module.") {
                Some(stripped) => stripped.to_string(),
                None => name,
            };
            (name, tensor)
        })
        .collect()
}

/// Reads a checkpoint into a `VarBuilder`. Safetensors files are memory-mapped;
/// anything else is treated as a PyTorch pickle, preferring its
/// `model_state_dict` entry over the top-level dictionary.
fn load_weights(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    if path.extension().is_some_and(|ext| ext == "safetensors") {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        return Ok(vb);
    }

    let tensors = match candle_core::pickle::read_all_with_key(path, Some("model_state_dict")) {
        Ok(tensors) => tensors,
        Err(_) => candle_core::pickle::read_all_with_key(path, None)
            .with_context(|| format!("reading checkpoint {}", path.display()))?,
    };
    if tensors.is_empty() {
        bail!("checkpoint {} contains no tensors", path.display());
    }

    Ok(VarBuilder::from_tensors(normalize_names(tensors), DType::F32, device))
}

/// Owned copy of what a first load needs, so the load can outlive the request
/// that started it.
struct ModelLoader {
    config: ModelConfig,
    architecture: DenseNetConfig,
    device: Device,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl ModelLoader {
    #[tracing::instrument(skip(self), fields(repo = %self.config.repo_id, file = %self.config.filename))]
    async fn load(self) -> Result<Arc<DenseNet>> {
        let started = Instant::now();
        let path = self
            .fetcher
            .fetch(&self.config.filename)
            .await
            .with_context(|| format!("downloading {}", self.config.filename))?;
        tracing::info!(path = %path.display(), "Checkpoint downloaded, building network");

        let Self {
            architecture,
            device,
            ..
        } = self;
        tracing::debug!(
            blocks = ?architecture.block_config,
            head_features = architecture.num_features(),
            "DenseNet architecture"
        );
        let model = tokio::task::spawn_blocking(move || -> Result<DenseNet> {
            let vb = load_weights(&path, &device)?;
            Ok(DenseNet::new(&architecture, vb)?)
        })
        .await??;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded successfully"
        );
        Ok(Arc::new(model))
    }
}

/// Lazily loads the classifier and its decision threshold, each at most once per
/// process, and runs single-image inference.
pub struct ModelService {
    config: ModelConfig,
    architecture: DenseNetConfig,
    device: Device,
    fetcher: Arc<dyn ArtifactFetcher>,
    threshold_override: Option<String>,
    model: Arc<OnceCell<Arc<DenseNet>>>,
    threshold: OnceCell<f64>,
}

impl ModelService {
    pub fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    pub fn new(
        config: ModelConfig,
        device: Device,
        fetcher: Arc<dyn ArtifactFetcher>,
        threshold_override: Option<String>,
    ) -> Self {
        Self {
            config,
            architecture: DenseNetConfig::densenet169(),
            device,
            fetcher,
            threshold_override,
            model: Arc::new(OnceCell::new()),
            threshold: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn with_architecture(mut self, architecture: DenseNetConfig) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn device_name(&self) -> &'static str {
        if self.device.is_cuda() {
            "cuda"
        } else if self.device.is_metal() {
            "metal"
        } else {
            "cpu"
        }
    }

    /// Loads the model and resolves the threshold ahead of the first request.
    pub async fn warm_up(&self) -> Result<()> {
        self.model().await?;
        let threshold = self.threshold().await;
        tracing::info!(threshold, "Model warmed up");
        Ok(())
    }

    /// The load runs on its own task. A caller that goes away mid-download leaves it
    /// running, and later callers wait on the same initialization.
    async fn model(&self) -> Result<Arc<DenseNet>> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let cell = self.model.clone();
        let loader = ModelLoader {
            config: self.config.clone(),
            architecture: self.architecture.clone(),
            device: self.device.clone(),
            fetcher: self.fetcher.clone(),
        };
        tokio::spawn(async move { cell.get_or_try_init(|| loader.load()).await.cloned() })
            .await
            .context("model load task failed")?
    }

    async fn threshold(&self) -> f64 {
        *self
            .threshold
            .get_or_init(|| async {
                let (threshold, source) = self.resolve_threshold().await;
                tracing::info!(threshold, ?source, "Decision threshold resolved");
                threshold
            })
            .await
    }

    async fn resolve_threshold(&self) -> (f64, ThresholdSource) {
        if let Some(raw) = self.threshold_override.as_deref() {
            match parse_threshold(raw) {
                Some(value) => return (value, ThresholdSource::Override),
                None => tracing::warn!(raw, "Ignoring threshold override outside [0, 1]"),
            }
        }

        match self.remote_threshold().await {
            Ok(Some(value)) => (value, ThresholdSource::DeploymentConfig),
            Ok(None) => (DEFAULT_THRESHOLD, ThresholdSource::Fallback),
            Err(e) => {
                tracing::debug!(error = %e, "No usable deployment config");
                (DEFAULT_THRESHOLD, ThresholdSource::Fallback)
            }
        }
    }

    async fn remote_threshold(&self) -> Result<Option<f64>> {
        let path = self.fetcher.fetch(DEPLOYMENT_CONFIG_FILE).await?;
        let raw = tokio::fs::read_to_string(&path).await?;
        let config: DeploymentConfig = serde_json::from_str(&raw)?;
        Ok(config
            .optimal_threshold
            .filter(|value| (0.0..=1.0).contains(value)))
    }
}

#[async_trait]
impl Classifier for ModelService {
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    async fn predict(&self, image: DynamicImage) -> Result<PredictionResult> {
        let started = Instant::now();
        let model = self.model().await?;
        let threshold = self.threshold().await;

        let device = self.device.clone();
        let size = self.config.image_size;
        let probs = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let input = image_to_tensor(&image, size, &device)?;
            let logits = model.forward(&input)?;
            Ok(softmax(&logits, 1)?.squeeze(0)?.to_vec1::<f32>()?)
        })
        .await??;

        let &[prob_normal, prob_sick] = probs.as_slice() else {
            bail!("expected two class probabilities, got {}", probs.len());
        };
        let (prob_normal, prob_sick) = (prob_normal as f64, prob_sick as f64);
        let (label, is_sick) = decide(prob_sick, threshold);
        let inference_ms = started.elapsed().as_millis() as u64;

        tracing::info!(%label, prob_sick, threshold, inference_ms, "Image classified");
        Ok(PredictionResult {
            label,
            is_sick,
            prob_sick,
            prob_normal,
            threshold,
            model_repo: self.config.repo_id.clone(),
            model_file: self.config.filename.clone(),
            image_size: self.config.image_size,
            inference_ms,
        })
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            device: self.device_name().to_string(),
            model_repo: self.config.repo_id.clone(),
            model_file: self.config.filename.clone(),
            image_size: self.config.image_size,
        }
    }
}
