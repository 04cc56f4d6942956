// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Execution backend selection for ONNX Runtime sessions

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::OcrError;

/// Hardware backend the model graphs are bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    #[default]
    Cpu,
    /// NVIDIA GPU; fails initialization when CUDA is not usable
    Cuda,
    /// CUDA when available, otherwise CPU
    Auto,
}

impl ExecutionBackend {
    /// Execution providers to register on every session, in priority order
    ///
    /// # Errors
    /// Returns `BackendUnsupported` when `Cuda` is requested but the CUDA
    /// provider cannot be used on this machine.
    pub fn execution_providers(&self) -> Result<Vec<ExecutionProviderDispatch>, OcrError> {
        match self {
            Self::Cpu => Ok(vec![CPUExecutionProvider::default().build()]),
            Self::Cuda => {
                if !cuda_available() {
                    return Err(OcrError::backend_unsupported(
                        "CUDA execution provider is not available on this machine",
                    ));
                }
                Ok(vec![CUDAExecutionProvider::default()
                    .build()
                    .error_on_failure()])
            }
            Self::Auto => {
                if cuda_available() {
                    info!("CUDA available, using GPU with CPU fallback");
                    Ok(vec![
                        CUDAExecutionProvider::default().build(),
                        CPUExecutionProvider::default().build(),
                    ])
                } else {
                    warn!("CUDA not available, falling back to CPU");
                    Ok(vec![CPUExecutionProvider::default().build()])
                }
            }
        }
    }
}

fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            warn!("Failed to query CUDA availability: {}", e);
            false
        }
    }
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionBackend {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "auto" => Ok(Self::Auto),
            other => Err(OcrError::Config(format!(
                "unknown device '{}', expected cpu, cuda or auto",
                other
            ))),
        }
    }
}
