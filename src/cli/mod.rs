// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod run;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{ExecutionBackend, OcrConfig};
use crate::error::OcrError;

pub use run::{execute, ConsoleReporter};

/// Extract text from images with a local vision-language model
#[derive(Parser, Debug)]
#[command(name = "vlm-ocr")]
#[command(version = crate::version::VERSION_NUMBER)]
#[command(about = "Extract all text from images with SmolVLM on ONNX Runtime", long_about = None)]
pub struct Cli {
    /// Images to read: file paths, http(s) URLs or data: URLs
    #[arg(required = true)]
    pub images: Vec<String>,

    /// TOML configuration file
    #[arg(long, env = "VLM_OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model id on the Hugging Face Hub
    #[arg(long)]
    pub model_id: Option<String>,

    /// Model revision (branch, tag or commit)
    #[arg(long)]
    pub revision: Option<String>,

    /// Execution backend (cpu, cuda, auto)
    #[arg(long)]
    pub device: Option<ExecutionBackend>,

    /// Component precision, e.g. decoder_model_merged=q4 (repeatable)
    #[arg(long, value_delimiter = ',')]
    pub dtype: Vec<String>,

    /// Maximum number of generated tokens
    #[arg(long)]
    pub max_new_tokens: Option<usize>,

    /// Repetition penalty (1.0 disables it)
    #[arg(long)]
    pub repetition_penalty: Option<f32>,

    /// Download cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Show download progress bars
    #[arg(long)]
    pub progress: bool,

    /// Encode only the downscaled global view of each image
    #[arg(long)]
    pub no_image_splitting: bool,

    /// Print one JSON object per image instead of plain text
    #[arg(long, env = "VLM_OCR_JSON")]
    pub json: bool,
}

impl Cli {
    /// Defaults, then the config file, then `VLM_OCR_*` variables, then flags
    pub fn load_config(&self) -> Result<OcrConfig> {
        let mut config = match &self.config {
            Some(path) => OcrConfig::from_file(path)?,
            None => OcrConfig::default(),
        };
        config.apply_env_overrides();
        self.apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut OcrConfig) -> Result<(), OcrError> {
        if let Some(model_id) = &self.model_id {
            config.model_id = model_id.clone();
        }
        if let Some(revision) = &self.revision {
            config.revision = revision.clone();
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        for spec in &self.dtype {
            config.dtype.apply_override(spec.trim())?;
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            config.generation.max_new_tokens = max_new_tokens;
        }
        if let Some(penalty) = self.repetition_penalty {
            config.generation.repetition_penalty = penalty;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if self.progress {
            config.show_download_progress = true;
        }
        if self.no_image_splitting {
            config.image_splitting = false;
        }
        Ok(())
    }
}
