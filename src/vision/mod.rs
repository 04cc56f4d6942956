// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision input and the SmolVLM backend
//!
//! This module provides:
//! - Image sources and decoding
//! - SmolVLM processor, model and loader

pub mod image_utils;
pub mod smolvlm;

pub use image_utils::{
    decode_base64_image, decode_image_bytes, detect_format, ImageError, ImageInfo, ImageSource,
};
