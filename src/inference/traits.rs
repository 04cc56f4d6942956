// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Seams between the session/handler and the inference backend

use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::generation::GenerationOutput;
use super::types::ModelInputs;
use crate::config::{GenerationConfig, OcrConfig};
use crate::error::OcrError;

/// Converts raw inputs to model tensors and model tokens back to text
pub trait InputProcessor: Send + Sync {
    /// Build the single-turn `[image, instruction]` prompt and image tensors
    fn prepare(&self, image: &DynamicImage, instruction: &str) -> Result<ModelInputs, OcrError>;

    fn decode(&self, token_ids: &[u32], skip_special_tokens: bool) -> Result<String, OcrError>;
}

/// A loaded vision-language model
///
/// Implementations are blocking; callers run them on the blocking pool.
pub trait VisionLanguageModel: Send + Sync {
    fn generate(
        &self,
        inputs: &ModelInputs,
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, OcrError>;
}

/// Acquires a processor and a model for a configuration
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_processor(&self, config: &OcrConfig) -> Result<Arc<dyn InputProcessor>, OcrError>;

    async fn load_model(&self, config: &OcrConfig)
        -> Result<Arc<dyn VisionLanguageModel>, OcrError>;
}
