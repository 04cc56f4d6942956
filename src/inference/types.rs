// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request, result and model-input types

use serde::Serialize;
use uuid::Uuid;

use crate::error::OcrError;
use crate::vision::image_utils::ImageSource;
use crate::vision::smolvlm::preprocessing::PixelInputs;

/// Everything the model needs for one generation
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// Tokenized prompt, image placeholders already expanded
    pub input_ids: Vec<u32>,
    /// Placeholder id whose embeddings are replaced by image features
    pub image_token_id: u32,
    pub pixels: PixelInputs,
    /// Token ids that end generation
    pub stop_token_ids: Vec<u32>,
}

/// One user action: an image plus the fixed instruction
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub image: ImageSource,
    pub instruction: String,
}

impl InferenceRequest {
    pub fn new(image: ImageSource, instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image,
            instruction: instruction.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceStatus {
    Success,
    Failed(OcrError),
}

/// Outcome of one request
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub request_id: Uuid,
    /// Cleaned text; empty on failure
    pub text: String,
    pub status: InferenceStatus,
    pub tokens_generated: usize,
    pub processing_time_ms: u64,
}

impl InferenceResult {
    pub fn success(
        request_id: Uuid,
        text: String,
        tokens_generated: usize,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id,
            text,
            status: InferenceStatus::Success,
            tokens_generated,
            processing_time_ms,
        }
    }

    pub fn failure(request_id: Uuid, error: OcrError, processing_time_ms: u64) -> Self {
        Self {
            request_id,
            text: String::new(),
            status: InferenceStatus::Failed(error),
            tokens_generated: 0,
            processing_time_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == InferenceStatus::Success
    }

    pub fn error(&self) -> Option<&OcrError> {
        match &self.status {
            InferenceStatus::Failed(err) => Some(err),
            InferenceStatus::Success => None,
        }
    }

    /// JSON-friendly view for hosts
    pub fn to_report(&self) -> InferenceReport {
        InferenceReport {
            request_id: self.request_id.to_string(),
            status: if self.is_success() { "success" } else { "failed" },
            text: self.text.clone(),
            error: self.error().map(|e| e.to_string()),
            tokens_generated: self.tokens_generated,
            processing_time_ms: self.processing_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceReport {
    pub request_id: String,
    pub status: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_generated: usize,
    pub processing_time_ms: u64,
}
