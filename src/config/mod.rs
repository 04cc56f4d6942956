// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the OCR session
//!
//! Sources, lowest priority first:
//! 1. [`OcrConfig::default`]
//! 2. A TOML file ([`OcrConfig::from_file`])
//! 3. `VLM_OCR_*` environment variables ([`OcrConfig::apply_env_overrides`])
//! 4. Command-line flags (see `cli`)

pub mod backend;
pub mod precision;

pub use backend::ExecutionBackend;
pub use precision::{ModelComponent, Precision, PrecisionConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::OcrError;

/// Default model: smallest SmolVLM instruct checkpoint with ONNX exports
pub const DEFAULT_MODEL_ID: &str = "HuggingFaceTB/SmolVLM-256M-Instruct";

/// Fixed single-turn instruction paired with every image
pub const DEFAULT_INSTRUCTION: &str = "Extract all text from this image.";

/// Hard cap on generated tokens
pub const DEFAULT_MAX_NEW_TOKENS: usize = 1024;

pub const DEFAULT_REPETITION_PENALTY: f32 = 1.1;

/// Decoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of new tokens; generation never exceeds it
    pub max_new_tokens: usize,
    /// Random sampling; only `false` is supported
    pub do_sample: bool,
    /// HF-style repetition penalty, 1.0 disables it
    pub repetition_penalty: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            do_sample: false,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), OcrError> {
        if self.max_new_tokens == 0 {
            return Err(OcrError::Config("max_new_tokens must be at least 1".into()));
        }
        if self.do_sample {
            return Err(OcrError::Config(
                "sampling is not supported, decoding is always greedy".into(),
            ));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(OcrError::Config(format!(
                "repetition_penalty must be positive, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}

/// Full session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Model identifier on the remote registry
    pub model_id: String,
    /// Registry revision (branch, tag or commit)
    pub revision: String,
    /// Execution backend all graphs are bound to
    pub device: ExecutionBackend,
    /// Component → precision mapping
    pub dtype: PrecisionConfig,
    pub generation: GenerationConfig,
    /// Instruction sent with every image
    pub instruction: String,
    /// Download cache directory; `None` uses the hub default
    pub cache_dir: Option<PathBuf>,
    /// Registry access token
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
    /// Show download progress bars
    pub show_download_progress: bool,
    /// Intra-op threads per ONNX session
    pub intra_threads: usize,
    /// Tile large images when the model's preprocessor config asks for it;
    /// `false` always encodes the global view only
    pub image_splitting: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            device: ExecutionBackend::default(),
            dtype: PrecisionConfig::default(),
            generation: GenerationConfig::default(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            cache_dir: None,
            hf_token: None,
            show_download_progress: false,
            intra_threads: 4,
            image_splitting: true,
        }
    }
}

impl OcrConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OcrError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, OcrError> {
        let config: Self =
            toml::from_str(content).map_err(|e| OcrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `VLM_OCR_*` variables on top of the current values
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("VLM_OCR_MODEL_ID") {
            self.model_id = val;
        }
        if let Some(val) = lookup("VLM_OCR_REVISION") {
            self.revision = val;
        }
        if let Some(val) = lookup("VLM_OCR_DEVICE") {
            match val.parse() {
                Ok(device) => self.device = device,
                Err(e) => warn!("Ignoring VLM_OCR_DEVICE: {}", e),
            }
        }
        if let Some(val) = lookup("VLM_OCR_DTYPE") {
            for spec in val.split(',').filter(|s| !s.trim().is_empty()) {
                if let Err(e) = self.dtype.apply_override(spec.trim()) {
                    warn!("Ignoring VLM_OCR_DTYPE entry: {}", e);
                }
            }
        }
        if let Some(val) = lookup("VLM_OCR_MAX_NEW_TOKENS") {
            match val.parse() {
                Ok(num) => self.generation.max_new_tokens = num,
                Err(e) => warn!("Ignoring VLM_OCR_MAX_NEW_TOKENS '{}': {}", val, e),
            }
        }
        if let Some(val) = lookup("VLM_OCR_REPETITION_PENALTY") {
            match val.parse() {
                Ok(num) => self.generation.repetition_penalty = num,
                Err(e) => warn!("Ignoring VLM_OCR_REPETITION_PENALTY '{}': {}", val, e),
            }
        }
        if let Some(val) = lookup("VLM_OCR_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("VLM_OCR_INTRA_THREADS") {
            match val.parse() {
                Ok(num) => self.intra_threads = num,
                Err(e) => warn!("Ignoring VLM_OCR_INTRA_THREADS '{}': {}", val, e),
            }
        }
        if let Some(val) = lookup("VLM_OCR_IMAGE_SPLITTING") {
            match val.parse() {
                Ok(flag) => self.image_splitting = flag,
                Err(e) => warn!("Ignoring VLM_OCR_IMAGE_SPLITTING '{}': {}", val, e),
            }
        }
        if let Some(val) = lookup("HF_TOKEN") {
            self.hf_token = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), OcrError> {
        if self.model_id.trim().is_empty() {
            return Err(OcrError::Config("model_id must not be empty".into()));
        }
        if self.instruction.trim().is_empty() {
            return Err(OcrError::Config("instruction must not be empty".into()));
        }
        if self.intra_threads == 0 {
            return Err(OcrError::Config("intra_threads must be at least 1".into()));
        }
        for (component, precision) in self.dtype.iter() {
            if precision.has_f16_io() {
                return Err(OcrError::Config(format!(
                    "{} precision {} uses float16 tensors, which this runtime does not feed",
                    component, precision
                )));
            }
        }
        self.generation.validate()
    }
}
