// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SmolVLM processor: chat template, tokenization and image tensors

use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use super::config::{read_json, ModelConfig, ProcessorConfig};
use super::preprocessing::{preprocess_image, ImageProcessorConfig, ResizeMode};
use crate::error::OcrError;
use crate::inference::traits::InputProcessor;
use crate::inference::types::ModelInputs;

pub const IMAGE_TOKEN: &str = "<image>";
pub const FAKE_IMAGE_TOKEN: &str = "<fake_token_around_image>";
pub const GLOBAL_IMAGE_TOKEN: &str = "<global-img>";
pub const END_OF_UTTERANCE: &str = "<end_of_utterance>";

/// End-of-sequence tokens that may be defined by the tokenizer
const EOS_CANDIDATES: [&str; 3] = ["<|im_end|>", "<|endoftext|>", "</s>"];

/// Render a single-turn `[image, instruction]` user message with the
/// generation prompt appended
pub fn render_chat_prompt(instruction: &str) -> String {
    format!(
        "<|im_start|>User:{}{}{}\nAssistant:",
        IMAGE_TOKEN, instruction, END_OF_UTTERANCE
    )
}

/// Token marking the tile at 1-based `row`, `col`
pub fn tile_token(row: usize, col: usize) -> String {
    format!("<row_{}_col_{}>", row, col)
}

/// Replace the first `<image>` placeholder with the image block
///
/// A `rows × cols` grid emits one block per tile, a newline after each row,
/// then the global view. A `0 × 0` grid emits the global view only.
pub fn expand_image_placeholder(
    prompt: &str,
    rows: usize,
    cols: usize,
    image_seq_len: usize,
) -> String {
    let features = IMAGE_TOKEN.repeat(image_seq_len);
    let mut block = String::new();
    if rows > 0 && cols > 0 {
        for r in 1..=rows {
            for c in 1..=cols {
                block.push_str(FAKE_IMAGE_TOKEN);
                block.push_str(&tile_token(r, c));
                block.push_str(&features);
            }
            block.push('\n');
        }
        block.push('\n');
    }
    block.push_str(FAKE_IMAGE_TOKEN);
    block.push_str(GLOBAL_IMAGE_TOKEN);
    block.push_str(&features);
    block.push_str(FAKE_IMAGE_TOKEN);
    prompt.replacen(IMAGE_TOKEN, &block, 1)
}

pub struct SmolVlmProcessor {
    tokenizer: Arc<Tokenizer>,
    image_config: ImageProcessorConfig,
    resize_mode: ResizeMode,
    image_seq_len: usize,
    image_token_id: u32,
    stop_token_ids: Vec<u32>,
}

impl std::fmt::Debug for SmolVlmProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmolVlmProcessor")
            .field("image_seq_len", &self.image_seq_len)
            .field("image_token_id", &self.image_token_id)
            .field("stop_token_ids", &self.stop_token_ids)
            .finish_non_exhaustive()
    }
}

impl SmolVlmProcessor {
    /// Build a processor from a loaded tokenizer
    ///
    /// `image_token_id` falls back to the tokenizer's `<image>` id.
    ///
    /// # Errors
    /// Returns error if the tokenizer lacks the `<image>` token or any stop token
    pub fn new(
        tokenizer: Tokenizer,
        mut image_config: ImageProcessorConfig,
        image_seq_len: usize,
        image_token_id: Option<u32>,
    ) -> Result<Self> {
        let image_token_id = match image_token_id {
            Some(id) => id,
            None => tokenizer
                .token_to_id(IMAGE_TOKEN)
                .with_context(|| format!("Tokenizer has no {} token", IMAGE_TOKEN))?,
        };

        let mut stop_token_ids = Vec::new();
        for token in std::iter::once(END_OF_UTTERANCE).chain(EOS_CANDIDATES) {
            if let Some(id) = tokenizer.token_to_id(token) {
                if !stop_token_ids.contains(&id) {
                    stop_token_ids.push(id);
                }
            }
        }
        if stop_token_ids.is_empty() {
            anyhow::bail!("Tokenizer defines neither {} nor an EOS token", END_OF_UTTERANCE);
        }

        if image_config.do_image_splitting && tokenizer.token_to_id(&tile_token(1, 1)).is_none() {
            warn!(
                "Tokenizer has no {} token; image splitting disabled",
                tile_token(1, 1)
            );
            image_config.do_image_splitting = false;
        }

        debug!(
            "Special tokens - image: {}, stop: {:?}, splitting: {}",
            image_token_id, stop_token_ids, image_config.do_image_splitting
        );

        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            image_config,
            resize_mode: ResizeMode::default(),
            image_seq_len,
            image_token_id,
            stop_token_ids,
        })
    }

    /// Load from hub files
    ///
    /// `processor_config` is optional; without it one image expands to the
    /// default sequence length.
    pub fn from_files(
        tokenizer_path: &Path,
        preprocessor_config_path: &Path,
        processor_config_path: Option<&Path>,
        model_config: &ModelConfig,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        info!(
            "Loaded tokenizer with {} tokens",
            tokenizer.get_vocab_size(true)
        );

        let image_config: ImageProcessorConfig = read_json(preprocessor_config_path)?;
        let processor_config = match processor_config_path {
            Some(path) => read_json::<ProcessorConfig>(path)?,
            None => ProcessorConfig::default(),
        };

        Self::new(
            tokenizer,
            image_config,
            processor_config.image_seq_len,
            model_config.image_token_id,
        )
    }

    pub fn with_resize_mode(mut self, mode: ResizeMode) -> Self {
        self.resize_mode = mode;
        self
    }

    /// Turn tiling off even when the preprocessor config asks for it
    ///
    /// Enabling has no effect when the model config or tokenizer does not
    /// support tiles.
    pub fn with_image_splitting(mut self, enabled: bool) -> Self {
        self.image_config.do_image_splitting &= enabled;
        self
    }

    pub fn image_splitting(&self) -> bool {
        self.image_config.do_image_splitting
    }

    pub fn image_seq_len(&self) -> usize {
        self.image_seq_len
    }

    pub fn image_token_id(&self) -> u32 {
        self.image_token_id
    }

    pub fn stop_token_ids(&self) -> &[u32] {
        &self.stop_token_ids
    }

    /// Token ids of the fully rendered prompt for a `rows × cols` tile grid
    pub fn tokenize_prompt(
        &self,
        instruction: &str,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<u32>, OcrError> {
        let prompt = expand_image_placeholder(
            &render_chat_prompt(instruction),
            rows,
            cols,
            self.image_seq_len,
        );
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(|e| OcrError::Generation(format!("failed to tokenize prompt: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl InputProcessor for SmolVlmProcessor {
    fn prepare(&self, image: &DynamicImage, instruction: &str) -> Result<ModelInputs, OcrError> {
        let pixels = preprocess_image(image, &self.image_config, self.resize_mode);
        let input_ids = self.tokenize_prompt(instruction, pixels.rows, pixels.cols)?;

        let expected = self.image_seq_len * pixels.num_frames();
        let placeholders = input_ids
            .iter()
            .filter(|&&id| id == self.image_token_id)
            .count();
        if placeholders != expected {
            return Err(OcrError::Generation(format!(
                "prompt has {} image tokens, expected {}",
                placeholders, expected
            )));
        }

        debug!(
            prompt_tokens = input_ids.len(),
            input_size = self.image_config.input_size(),
            rows = pixels.rows,
            cols = pixels.cols,
            "Prepared model inputs"
        );

        Ok(ModelInputs {
            input_ids,
            image_token_id: self.image_token_id,
            pixels,
            stop_token_ids: self.stop_token_ids.clone(),
        })
    }

    fn decode(&self, token_ids: &[u32], skip_special_tokens: bool) -> Result<String, OcrError> {
        self.tokenizer
            .decode(token_ids, skip_special_tokens)
            .map_err(|e| OcrError::Generation(format!("failed to decode tokens: {}", e)))
    }
}
