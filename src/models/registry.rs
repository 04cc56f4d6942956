// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model artifact resolution against the remote registry
//!
//! Files are resolved by `(model_id, revision, path)` and land in the local
//! hub cache. Nothing is ever read from arbitrary local paths.

use async_trait::async_trait;
use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::error::{InitFailureKind, OcrError};

/// Resolves model files to local paths
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Fetch one file of a model repository
    ///
    /// # Errors
    /// - `Initialization(DownloadFailed)` for network or registry failures
    /// - `Initialization(ArtifactInvalid)` if the file does not exist
    async fn fetch(&self, model_id: &str, revision: &str, file: &str)
        -> Result<PathBuf, OcrError>;

    /// Like [`fetch`](Self::fetch), but a missing file is `Ok(None)`
    async fn fetch_optional(
        &self,
        model_id: &str,
        revision: &str,
        file: &str,
    ) -> Result<Option<PathBuf>, OcrError> {
        match self.fetch(model_id, revision, file).await {
            Ok(path) => Ok(Some(path)),
            Err(err) if err.init_kind() == Some(InitFailureKind::ArtifactInvalid) => {
                debug!(model_id, file, "Optional artifact not present");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Hugging Face Hub source, cached on disk by `hf-hub`
#[derive(Clone, Debug)]
pub struct HubSource {
    api: Api,
}

impl HubSource {
    pub fn new(
        cache_dir: Option<PathBuf>,
        token: Option<String>,
        show_progress: bool,
    ) -> Result<Self, OcrError> {
        let mut builder = ApiBuilder::new().with_progress(show_progress);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir);
        }
        if token.is_some() {
            builder = builder.with_token(token);
        }
        let api = builder
            .build()
            .map_err(|e| OcrError::download_failed(format!("failed to create hub client: {}", e)))?;
        Ok(Self { api })
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        Self::new(
            config.cache_dir.clone(),
            config.hf_token.clone(),
            config.show_download_progress,
        )
    }
}

#[async_trait]
impl ModelSource for HubSource {
    async fn fetch(
        &self,
        model_id: &str,
        revision: &str,
        file: &str,
    ) -> Result<PathBuf, OcrError> {
        let api = self.api.clone();
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let file_name = file.to_string();

        debug!(model_id, revision, file, "Resolving model artifact");
        let result = tokio::task::spawn_blocking(move || api.repo(repo).get(&file_name))
            .await
            .map_err(|e| OcrError::download_failed(format!("download task failed: {}", e)))?;

        match result {
            Ok(path) => {
                info!(model_id, file, path = %path.display(), "📦 Artifact ready");
                Ok(path)
            }
            Err(e) => Err(classify_fetch_error(model_id, file, &e.to_string())),
        }
    }
}

/// Map a registry error message onto the initialization failure taxonomy
pub(crate) fn classify_fetch_error(model_id: &str, file: &str, message: &str) -> OcrError {
    let reason = format!("{}/{}: {}", model_id, file, message);
    if message.contains("404") {
        OcrError::artifact_invalid(reason)
    } else {
        OcrError::download_failed(reason)
    }
}
