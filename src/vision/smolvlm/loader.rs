// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Acquires SmolVLM processor and model artifacts for a session

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::config::{read_json, ModelConfig};
use super::model::{ModelPaths, SmolVlmModel};
use super::preprocessing::ResizeMode;
use super::processor::SmolVlmProcessor;
use crate::config::{ModelComponent, OcrConfig};
use crate::error::{describe, OcrError};
use crate::inference::traits::{InputProcessor, ModelLoader, VisionLanguageModel};
use crate::models::registry::{HubSource, ModelSource};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";
pub const PROCESSOR_CONFIG_FILE: &str = "processor_config.json";

/// Default [`ModelLoader`]: resolves files through a [`ModelSource`] and
/// builds the ONNX-backed processor and model
pub struct SmolVlmLoader {
    source: Arc<dyn ModelSource>,
    resize_mode: ResizeMode,
}

impl SmolVlmLoader {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            resize_mode: ResizeMode::default(),
        }
    }

    /// Loader backed by the hub, with cache and token taken from `config`
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        Ok(Self::new(Arc::new(HubSource::from_config(config)?)))
    }

    pub fn with_resize_mode(mut self, mode: ResizeMode) -> Self {
        self.resize_mode = mode;
        self
    }

    async fn fetch(&self, config: &OcrConfig, file: &str) -> Result<PathBuf, OcrError> {
        self.source
            .fetch(&config.model_id, &config.revision, file)
            .await
    }

    async fn fetch_graph(
        &self,
        config: &OcrConfig,
        component: ModelComponent,
    ) -> Result<PathBuf, OcrError> {
        let file = config.dtype.onnx_file(component);
        info!(
            component = %component,
            precision = %config.dtype.get(component),
            "Fetching {}", file
        );
        self.fetch(config, &file).await
    }
}

fn join_error(err: tokio::task::JoinError) -> OcrError {
    OcrError::artifact_invalid(format!("loader task failed: {}", err))
}

#[async_trait]
impl ModelLoader for SmolVlmLoader {
    async fn load_processor(
        &self,
        config: &OcrConfig,
    ) -> Result<Arc<dyn InputProcessor>, OcrError> {
        let tokenizer_path = self.fetch(config, TOKENIZER_FILE).await?;
        let model_config_path = self.fetch(config, MODEL_CONFIG_FILE).await?;
        let preprocessor_path = self.fetch(config, PREPROCESSOR_CONFIG_FILE).await?;
        let processor_path = self
            .source
            .fetch_optional(&config.model_id, &config.revision, PROCESSOR_CONFIG_FILE)
            .await?;

        let resize_mode = self.resize_mode;
        let image_splitting = config.image_splitting;
        let processor = tokio::task::spawn_blocking(move || {
            let model_config: ModelConfig = read_json(&model_config_path)?;
            SmolVlmProcessor::from_files(
                &tokenizer_path,
                &preprocessor_path,
                processor_path.as_deref(),
                &model_config,
            )
            .map(|p| {
                p.with_resize_mode(resize_mode)
                    .with_image_splitting(image_splitting)
            })
        })
        .await
        .map_err(join_error)?
        .map_err(|e| OcrError::artifact_invalid(describe(&e)))?;

        info!(model_id = %config.model_id, "Processor ready");
        Ok(Arc::new(processor))
    }

    async fn load_model(
        &self,
        config: &OcrConfig,
    ) -> Result<Arc<dyn VisionLanguageModel>, OcrError> {
        // Fail before downloading anything if the backend cannot run here
        config.device.execution_providers()?;

        let model_config_path = self.fetch(config, MODEL_CONFIG_FILE).await?;

        let paths = ModelPaths {
            embed_tokens: self.fetch_graph(config, ModelComponent::EmbedTokens).await?,
            vision_encoder: self.fetch_graph(config, ModelComponent::VisionEncoder).await?,
            decoder_model_merged: self
                .fetch_graph(config, ModelComponent::DecoderModelMerged)
                .await?,
        };

        let device = config.device;
        let intra_threads = config.intra_threads;
        let model = tokio::task::spawn_blocking(move || {
            let model_config: ModelConfig = read_json(&model_config_path)
                .map_err(|e| OcrError::artifact_invalid(describe(&e)))?;
            SmolVlmModel::load(&paths, &model_config.text_config, device, intra_threads)
        })
        .await
        .map_err(join_error)??;

        Ok(Arc::new(model))
    }
}
