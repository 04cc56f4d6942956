// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Hub configuration files for SmolVLM / Idefics3 checkpoints

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

/// Number of `<image>` tokens one image expands to when not configured
pub const DEFAULT_IMAGE_SEQ_LEN: usize = 64;

/// Language model geometry from `config.json` → `text_config`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextConfig {
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub hidden_size: usize,
    /// Absent in older exports; derived from `hidden_size / num_attention_heads`
    #[serde(default)]
    pub head_dim: Option<usize>,
}

impl TextConfig {
    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads.max(1))
    }
}

/// `config.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub text_config: TextConfig,
    /// Token id whose embeddings are replaced by image features
    #[serde(default)]
    pub image_token_id: Option<u32>,
}

/// `processor_config.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_image_seq_len")]
    pub image_seq_len: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            image_seq_len: DEFAULT_IMAGE_SEQ_LEN,
        }
    }
}

fn default_image_seq_len() -> usize {
    DEFAULT_IMAGE_SEQ_LEN
}

/// Read and parse a JSON config file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
