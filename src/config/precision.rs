// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-component numeric precision selection
//!
//! ONNX exports of vision-language models ship every graph in several
//! precisions side by side (`decoder_model_merged.onnx`,
//! `decoder_model_merged_q4.onnx`, ...). A [`PrecisionConfig`] picks one file
//! per component, trading accuracy for throughput where it is safe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OcrError;

/// A graph inside an exported vision-language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelComponent {
    /// Token id → embedding lookup
    EmbedTokens,
    /// Image → visual features
    VisionEncoder,
    /// Text encoder (encoder-decoder exports only)
    EncoderModel,
    /// Decoder with merged prefill / cached-step branches
    DecoderModelMerged,
}

impl ModelComponent {
    pub const ALL: [ModelComponent; 4] = [
        Self::EmbedTokens,
        Self::VisionEncoder,
        Self::EncoderModel,
        Self::DecoderModelMerged,
    ];

    /// File stem used by the ONNX export
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::EmbedTokens => "embed_tokens",
            Self::VisionEncoder => "vision_encoder",
            Self::EncoderModel => "encoder_model",
            Self::DecoderModelMerged => "decoder_model_merged",
        }
    }
}

impl fmt::Display for ModelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for ModelComponent {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.file_stem() == s.trim())
            .ok_or_else(|| OcrError::Config(format!("unknown model component '{}'", s)))
    }
}

/// Numeric format of a component's weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
    /// 8-bit dynamic quantization (`_quantized` files)
    Q8,
    Int8,
    Uint8,
    Q4,
    Q4f16,
    Bnb4,
}

impl Precision {
    /// Suffix appended to the component file stem
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Fp32 => "",
            Self::Fp16 => "_fp16",
            Self::Q8 => "_quantized",
            Self::Int8 => "_int8",
            Self::Uint8 => "_uint8",
            Self::Q4 => "_q4",
            Self::Q4f16 => "_q4f16",
            Self::Bnb4 => "_bnb4",
        }
    }

    /// Whether graph inputs/outputs are float16 rather than float32
    pub fn has_f16_io(&self) -> bool {
        matches!(self, Self::Fp16 | Self::Q4f16)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Q8 => "q8",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Q4 => "q4",
            Self::Q4f16 => "q4f16",
            Self::Bnb4 => "bnb4",
        };
        f.write_str(s)
    }
}

impl FromStr for Precision {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fp32" | "float32" => Ok(Self::Fp32),
            "fp16" | "float16" => Ok(Self::Fp16),
            "q8" | "quantized" => Ok(Self::Q8),
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::Uint8),
            "q4" => Ok(Self::Q4),
            "q4f16" => Ok(Self::Q4f16),
            "bnb4" => Ok(Self::Bnb4),
            other => Err(OcrError::Config(format!("unknown precision '{}'", other))),
        }
    }
}

/// Mapping of model component → precision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecisionConfig(BTreeMap<ModelComponent, Precision>);

impl Default for PrecisionConfig {
    /// High precision for embeddings and the vision tower, 4-bit for the
    /// language side
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert(ModelComponent::EmbedTokens, Precision::Fp32);
        map.insert(ModelComponent::VisionEncoder, Precision::Fp32);
        map.insert(ModelComponent::EncoderModel, Precision::Q4);
        map.insert(ModelComponent::DecoderModelMerged, Precision::Q4);
        Self(map)
    }
}

impl PrecisionConfig {
    /// Precision for a component; components missing from the map use fp32
    pub fn get(&self, component: ModelComponent) -> Precision {
        self.0.get(&component).copied().unwrap_or(Precision::Fp32)
    }

    pub fn set(&mut self, component: ModelComponent, precision: Precision) {
        self.0.insert(component, precision);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelComponent, Precision)> + '_ {
        self.0.iter().map(|(c, p)| (*c, *p))
    }

    /// Repository path of a component's ONNX file, e.g. `onnx/decoder_model_merged_q4.onnx`
    pub fn onnx_file(&self, component: ModelComponent) -> String {
        format!(
            "onnx/{}{}.onnx",
            component.file_stem(),
            self.get(component).file_suffix()
        )
    }

    /// Apply a `component=precision` override
    pub fn apply_override(&mut self, spec: &str) -> Result<(), OcrError> {
        let (component, precision) = spec.split_once('=').ok_or_else(|| {
            OcrError::Config(format!(
                "dtype override '{}' must look like component=precision",
                spec
            ))
        })?;
        self.set(component.parse()?, precision.parse()?);
        Ok(())
    }
}
