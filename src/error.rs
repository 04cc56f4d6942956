// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for model loading and OCR requests
//!
//! Every failure is caught at the boundary of the operation that raised it and
//! surfaced as an [`OcrError`]. Nothing here is retried automatically and none
//! of these errors is fatal to the process: a failed session can be
//! re-initialized by calling `initialize()` again.

use thiserror::Error;

/// Why a session failed to initialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFailureKind {
    /// The requested execution backend is not available on this machine
    BackendUnsupported,
    /// A model or processor artifact could not be fetched from the registry
    DownloadFailed,
    /// An artifact was fetched but is missing, malformed or incompatible
    ArtifactInvalid,
}

impl std::fmt::Display for InitFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BackendUnsupported => "backend unsupported",
            Self::DownloadFailed => "download failed",
            Self::ArtifactInvalid => "artifact invalid",
        };
        f.write_str(s)
    }
}

/// Error taxonomy for the OCR core
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OcrError {
    #[error("Initialization failed ({kind}): {reason}")]
    Initialization {
        kind: InitFailureKind,
        reason: String,
    },

    #[error("Request rejected: {reason}")]
    RequestRejected { reason: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl OcrError {
    pub fn backend_unsupported(reason: impl Into<String>) -> Self {
        Self::Initialization {
            kind: InitFailureKind::BackendUnsupported,
            reason: reason.into(),
        }
    }

    pub fn download_failed(reason: impl Into<String>) -> Self {
        Self::Initialization {
            kind: InitFailureKind::DownloadFailed,
            reason: reason.into(),
        }
    }

    pub fn artifact_invalid(reason: impl Into<String>) -> Self {
        Self::Initialization {
            kind: InitFailureKind::ArtifactInvalid,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RequestRejected {
            reason: reason.into(),
        }
    }

    /// Initialization failure kind, if this is an initialization error
    pub fn init_kind(&self) -> Option<InitFailureKind> {
        match self {
            Self::Initialization { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::RequestRejected { .. })
    }
}

/// Flatten an `anyhow` chain into a single line, keeping every cause
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
