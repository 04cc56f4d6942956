// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! On-device OCR with a small vision-language model
//!
//! A host owns one [`ModelSession`], initializes it once and hands it to an
//! [`OcrHandler`], which turns images into cleaned text:
//!
//! ```no_run
//! use std::sync::Arc;
//! use vlm_ocr::{ImageSource, ModelSession, OcrConfig, OcrHandler, SmolVlmLoader};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = OcrConfig::from_env();
//! let loader = SmolVlmLoader::from_config(&config)?;
//! let session = Arc::new(ModelSession::new(config, Arc::new(loader)));
//! session.initialize().await?;
//!
//! let handler = OcrHandler::new(session);
//! let result = handler.run(ImageSource::from_reference("receipt.png")).await;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod version;
pub mod vision;

// Re-export main types
pub use config::{ExecutionBackend, GenerationConfig, ModelComponent, OcrConfig, Precision};
pub use error::{InitFailureKind, OcrError};
pub use inference::{
    InferenceRequest, InferenceResult, InferenceStatus, ModelSession, OcrHandler, SessionStatus,
    StatusReporter, StatusUpdate,
};
pub use models::{HubSource, ModelSource};
pub use vision::image_utils::ImageSource;
pub use vision::smolvlm::SmolVlmLoader;
