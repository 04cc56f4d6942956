// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Session lifecycle, request handling and decoding
pub mod generation;
pub mod handler;
pub mod postprocess;
pub mod session;
pub mod status;
pub mod traits;
pub mod types;

// Re-export main types for convenience
pub use generation::{greedy_decode, FinishReason, GenerationOutput, LogitsStep};
pub use handler::OcrHandler;
pub use postprocess::clean_output;
pub use session::{LoadedModel, ModelSession, SessionStatus};
pub use status::{StatusLevel, StatusReporter, StatusUpdate, TracingReporter};
pub use traits::{InputProcessor, ModelLoader, VisionLanguageModel};
pub use types::{InferenceReport, InferenceRequest, InferenceResult, InferenceStatus, ModelInputs};
