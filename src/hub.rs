use anyhow::Result;
use async_trait::async_trait;
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;

/// Source of model artifacts (weights, deployment config) by file name.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, filename: &str) -> Result<PathBuf>;
}

/// Downloads files from a Hugging Face model repository into the local hub cache.
pub struct HubFetcher {
    repo_id: String,
    repo: ApiRepo,
}

impl HubFetcher {
    pub fn new(repo_id: &str, token: Option<String>) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_token(token)
            .with_progress(false)
            .build()?;
        let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));
        Ok(Self {
            repo_id: repo_id.to_string(),
            repo,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for HubFetcher {
    #[tracing::instrument(skip(self), fields(repo = %self.repo_id))]
    async fn fetch(&self, filename: &str) -> Result<PathBuf> {
        let path = self.repo.get(filename).await?;
        tracing::debug!(path = %path.display(), "Artifact available locally");
        Ok(path)
    }
}
