// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SmolVLM (Idefics3) vision-language model on ONNX Runtime
//!
//! - [`SmolVlmProcessor`]: chat template, tokenization, image tensors
//! - [`SmolVlmModel`]: embed tokens + vision encoder + merged decoder
//! - [`SmolVlmLoader`]: fetches artifacts and builds both for a session

pub mod config;
pub mod loader;
pub mod model;
pub mod preprocessing;
pub mod processor;

pub use config::{ModelConfig, ProcessorConfig, TextConfig};
pub use loader::SmolVlmLoader;
pub use model::{merge_image_features, KvGeometry, ModelPaths, SmolVlmModel};
pub use preprocessing::{preprocess_image, ImageProcessorConfig, PixelInputs, ResizeMode};
pub use processor::{expand_image_placeholder, render_chat_prompt, tile_token, SmolVlmProcessor};
