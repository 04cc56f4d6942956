// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SmolVLM ONNX model
//!
//! Three graphs make up the model:
//! - `embed_tokens`: `input_ids → inputs_embeds`
//! - `vision_encoder`: `pixel_values, pixel_attention_mask → image_features`
//! - `decoder_model_merged`: `inputs_embeds, attention_mask, [position_ids],
//!   past_key_values.* → logits, present.*`
//!
//! Prompt embeddings at `<image>` positions are overwritten with the image
//! features, then the merged decoder runs autoregressively with a KV cache.

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, ArrayD, Axis, Ix3, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::TextConfig;
use crate::config::{ExecutionBackend, GenerationConfig};
use crate::error::{describe, OcrError};
use crate::inference::generation::{greedy_decode, GenerationOutput, LogitsStep};
use crate::inference::traits::VisionLanguageModel;
use crate::inference::types::ModelInputs;
use crate::vision::smolvlm::preprocessing::PixelInputs;

/// Local paths of the three ONNX graphs
///
/// Other components of an export (`encoder_model`) are never loaded.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub embed_tokens: PathBuf,
    pub vision_encoder: PathBuf,
    pub decoder_model_merged: PathBuf,
}

/// KV cache shape per layer: `[1, kv_heads, seq, head_dim]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvGeometry {
    pub num_layers: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

impl From<&TextConfig> for KvGeometry {
    fn from(config: &TextConfig) -> Self {
        Self {
            num_layers: config.num_hidden_layers,
            num_kv_heads: config.num_key_value_heads,
            head_dim: config.head_dim(),
        }
    }
}

impl KvGeometry {
    fn empty_cache(&self) -> Vec<(ArrayD<f32>, ArrayD<f32>)> {
        let shape = IxDyn(&[1, self.num_kv_heads, 0, self.head_dim]);
        (0..self.num_layers)
            .map(|_| (ArrayD::zeros(shape.clone()), ArrayD::zeros(shape.clone())))
            .collect()
    }
}

/// Build an ONNX session bound to `backend`
pub fn build_session(
    path: &Path,
    backend: ExecutionBackend,
    intra_threads: usize,
) -> Result<Session> {
    let providers = backend
        .execution_providers()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers(providers)
        .context("Failed to set execution providers")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(intra_threads)
        .context("Failed to set intra threads")?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load ONNX model from {}", path.display()))
}

#[derive(Clone)]
pub struct SmolVlmModel {
    embed_tokens: Arc<Mutex<Session>>,
    vision_encoder: Arc<Mutex<Session>>,
    decoder: Arc<Mutex<Session>>,
    geometry: KvGeometry,
    decoder_uses_position_ids: bool,
    vision_uses_attention_mask: bool,
}

impl std::fmt::Debug for SmolVlmModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmolVlmModel")
            .field("geometry", &self.geometry)
            .field("decoder_uses_position_ids", &self.decoder_uses_position_ids)
            .finish_non_exhaustive()
    }
}

impl SmolVlmModel {
    /// Load the three graphs on `backend`
    ///
    /// # Errors
    /// - `Initialization(BackendUnsupported)` if `backend` is not available
    /// - `Initialization(ArtifactInvalid)` if a graph cannot be loaded
    pub fn load(
        paths: &ModelPaths,
        text_config: &TextConfig,
        backend: ExecutionBackend,
        intra_threads: usize,
    ) -> Result<Self, OcrError> {
        // Surface an unavailable backend before touching any file
        backend.execution_providers()?;

        let load = |path: &Path| {
            info!("Loading {} on {}", path.display(), backend);
            build_session(path, backend, intra_threads)
                .map_err(|e| OcrError::artifact_invalid(describe(&e)))
        };

        let embed_tokens = load(&paths.embed_tokens)?;
        let vision_encoder = load(&paths.vision_encoder)?;
        let decoder = load(&paths.decoder_model_merged)?;

        let geometry = KvGeometry::from(text_config);
        let decoder_inputs: Vec<&str> = decoder.inputs.iter().map(|i| i.name.as_str()).collect();
        debug!("Decoder inputs: {:?}", decoder_inputs);

        let expected_kv = decoder_inputs
            .iter()
            .filter(|name| name.starts_with("past_key_values."))
            .count();
        if expected_kv != geometry.num_layers * 2 {
            return Err(OcrError::artifact_invalid(format!(
                "decoder expects {} cache tensors but config.json describes {} layers",
                expected_kv, geometry.num_layers
            )));
        }

        let decoder_uses_position_ids = decoder_inputs.contains(&"position_ids");
        let vision_uses_attention_mask = vision_encoder
            .inputs
            .iter()
            .any(|i| i.name == "pixel_attention_mask");

        info!(
            layers = geometry.num_layers,
            kv_heads = geometry.num_kv_heads,
            head_dim = geometry.head_dim,
            "✅ SmolVLM model loaded"
        );

        Ok(Self {
            embed_tokens: Arc::new(Mutex::new(embed_tokens)),
            vision_encoder: Arc::new(Mutex::new(vision_encoder)),
            decoder: Arc::new(Mutex::new(decoder)),
            geometry,
            decoder_uses_position_ids,
            vision_uses_attention_mask,
        })
    }

    pub fn geometry(&self) -> KvGeometry {
        self.geometry
    }

    /// Image features flattened to `[num_rows, hidden]`
    fn encode_image(&self, pixels: &PixelInputs) -> Result<Array2<f32>> {
        let mut session = self
            .vision_encoder
            .lock()
            .map_err(|_| anyhow::anyhow!("vision encoder session lock poisoned"))?;

        let mut inputs: Vec<(String, DynValue)> = vec![(
            "pixel_values".to_string(),
            Value::from_array(pixels.pixel_values.clone())
                .context("Failed to create pixel_values tensor")?
                .into_dyn(),
        )];
        if self.vision_uses_attention_mask {
            inputs.push((
                "pixel_attention_mask".to_string(),
                Value::from_array(pixels.pixel_attention_mask.clone())
                    .context("Failed to create pixel_attention_mask tensor")?
                    .into_dyn(),
            ));
        }

        let outputs = session.run(inputs).context("Vision encoder inference failed")?;
        let features = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract image features")?;

        let shape = features.shape().to_vec();
        let hidden = *shape
            .last()
            .context("Image features tensor has no dimensions")?;
        let rows = if hidden == 0 { 0 } else { features.len() / hidden };
        debug!("Image features shape: {:?}", shape);

        features
            .to_owned()
            .into_shape_with_order((rows, hidden))
            .context("Failed to flatten image features")
    }

    /// Token embeddings `[1, len, hidden]`
    fn embed(&self, input_ids: &[u32]) -> Result<Array3<f32>> {
        let mut session = self
            .embed_tokens
            .lock()
            .map_err(|_| anyhow::anyhow!("embed_tokens session lock poisoned"))?;

        let ids = Array2::from_shape_fn((1, input_ids.len()), |(_, i)| input_ids[i] as i64);
        let ids_value = Value::from_array(ids).context("Failed to create input_ids tensor")?;

        let outputs = session
            .run(ort::inputs!["input_ids" => ids_value])
            .context("embed_tokens inference failed")?;
        let embeds = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract embeddings tensor")?;

        embeds
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Unexpected embeddings rank")
    }

    /// One decoder pass; consumes the cache and returns the updated one
    fn decode_step(
        &self,
        inputs_embeds: Array3<f32>,
        past: Vec<(ArrayD<f32>, ArrayD<f32>)>,
        past_len: usize,
    ) -> Result<(Vec<f32>, Vec<(ArrayD<f32>, ArrayD<f32>)>)> {
        let new_len = inputs_embeds.shape()[1];
        let total_len = past_len + new_len;

        let mut inputs: Vec<(String, DynValue)> = Vec::with_capacity(3 + past.len() * 2);
        inputs.push((
            "inputs_embeds".to_string(),
            Value::from_array(inputs_embeds)
                .context("Failed to create inputs_embeds tensor")?
                .into_dyn(),
        ));
        inputs.push((
            "attention_mask".to_string(),
            Value::from_array(Array2::<i64>::ones((1, total_len)))
                .context("Failed to create attention_mask tensor")?
                .into_dyn(),
        ));
        if self.decoder_uses_position_ids {
            let positions = Array2::from_shape_fn((1, new_len), |(_, i)| (past_len + i) as i64);
            inputs.push((
                "position_ids".to_string(),
                Value::from_array(positions)
                    .context("Failed to create position_ids tensor")?
                    .into_dyn(),
            ));
        }
        for (layer, (key, value)) in past.into_iter().enumerate() {
            inputs.push((
                format!("past_key_values.{}.key", layer),
                Value::from_array(key)
                    .context("Failed to create past key tensor")?
                    .into_dyn(),
            ));
            inputs.push((
                format!("past_key_values.{}.value", layer),
                Value::from_array(value)
                    .context("Failed to create past value tensor")?
                    .into_dyn(),
            ));
        }

        let mut session = self
            .decoder
            .lock()
            .map_err(|_| anyhow::anyhow!("decoder session lock poisoned"))?;
        let outputs = session.run(inputs).context("Decoder inference failed")?;

        let logits = outputs["logits"]
            .try_extract_array::<f32>()
            .context("Failed to extract logits")?;
        let last: Vec<f32> = logits
            .index_axis(Axis(0), 0)
            .index_axis(Axis(0), new_len.saturating_sub(1))
            .iter()
            .copied()
            .collect();

        let mut present = Vec::with_capacity(self.geometry.num_layers);
        for layer in 0..self.geometry.num_layers {
            let key_name = format!("present.{}.key", layer);
            let value_name = format!("present.{}.value", layer);
            let key = outputs[key_name.as_str()]
                .try_extract_array::<f32>()
                .with_context(|| format!("Failed to extract {}", key_name))?
                .to_owned();
            let value = outputs[value_name.as_str()]
                .try_extract_array::<f32>()
                .with_context(|| format!("Failed to extract {}", value_name))?
                .to_owned();
            present.push((key, value));
        }

        Ok((last, present))
    }
}

/// Overwrite embeddings at image placeholder positions with feature rows, in order
pub fn merge_image_features(
    embeds: &mut Array3<f32>,
    input_ids: &[u32],
    image_token_id: u32,
    features: &Array2<f32>,
) -> Result<(), OcrError> {
    let positions: Vec<usize> = input_ids
        .iter()
        .enumerate()
        .filter(|(_, id)| **id == image_token_id)
        .map(|(i, _)| i)
        .collect();

    if positions.len() != features.nrows() {
        return Err(OcrError::Generation(format!(
            "prompt has {} image tokens but the encoder produced {} feature rows",
            positions.len(),
            features.nrows()
        )));
    }
    if embeds.shape()[2] != features.ncols() {
        return Err(OcrError::Generation(format!(
            "image feature width {} does not match embedding width {}",
            features.ncols(),
            embeds.shape()[2]
        )));
    }

    for (row, pos) in positions.into_iter().enumerate() {
        embeds
            .index_axis_mut(Axis(0), 0)
            .row_mut(pos)
            .assign(&features.row(row));
    }
    Ok(())
}

/// Decoding state for one generation: prompt embeddings, then the KV cache
struct DecodeState<'a> {
    model: &'a SmolVlmModel,
    prompt_embeds: Option<Array3<f32>>,
    past: Vec<(ArrayD<f32>, ArrayD<f32>)>,
    past_len: usize,
}

impl LogitsStep for DecodeState<'_> {
    fn forward(&mut self, new_tokens: &[u32]) -> Result<Vec<f32>, OcrError> {
        let embeds = match self.prompt_embeds.take() {
            Some(embeds) => embeds,
            None => self
                .model
                .embed(new_tokens)
                .map_err(|e| OcrError::Generation(describe(&e)))?,
        };
        let new_len = embeds.shape()[1];

        let past = std::mem::take(&mut self.past);
        let (logits, present) = self
            .model
            .decode_step(embeds, past, self.past_len)
            .map_err(|e| OcrError::Generation(describe(&e)))?;

        self.past = present;
        self.past_len += new_len;
        Ok(logits)
    }
}

impl VisionLanguageModel for SmolVlmModel {
    fn generate(
        &self,
        inputs: &ModelInputs,
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, OcrError> {
        let to_generation = |e: anyhow::Error| OcrError::Generation(describe(&e));

        let features = self.encode_image(&inputs.pixels).map_err(to_generation)?;
        let mut embeds = self.embed(&inputs.input_ids).map_err(to_generation)?;
        merge_image_features(&mut embeds, &inputs.input_ids, inputs.image_token_id, &features)?;

        let mut state = DecodeState {
            model: self,
            prompt_embeds: Some(embeds),
            past: self.geometry.empty_cache(),
            past_len: 0,
        };
        greedy_decode(
            &mut state,
            &inputs.input_ids,
            config,
            &inputs.stop_token_ids,
            cancel,
        )
    }
}
