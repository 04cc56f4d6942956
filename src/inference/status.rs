// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Status messages for the display collaborator

use std::fmt;
use tracing::{error, info, warn};

use crate::error::OcrError;

/// Severity, mirroring the alert styles of a typical status banner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Danger,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Danger => "danger",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub level: StatusLevel,
    pub message: String,
}

impl StatusUpdate {
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn loading(model_id: &str) -> Self {
        Self::new(StatusLevel::Info, format!("Loading {}...", model_id))
    }

    pub fn ready() -> Self {
        Self::new(StatusLevel::Success, "Ready! Select an image.")
    }

    pub fn processing() -> Self {
        Self::new(StatusLevel::Warning, "Processing...")
    }

    pub fn done() -> Self {
        Self::new(StatusLevel::Success, "Done!")
    }

    pub fn error(err: &OcrError) -> Self {
        Self::new(StatusLevel::Danger, format!("Error: {}", err))
    }
}

/// Receives status updates from the session and handler
pub trait StatusReporter: Send + Sync {
    fn report(&self, update: &StatusUpdate);
}

/// Default reporter: forwards updates to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, update: &StatusUpdate) {
        match update.level {
            StatusLevel::Info | StatusLevel::Success => {
                info!(level = %update.level, "{}", update.message)
            }
            StatusLevel::Warning => warn!(level = %update.level, "{}", update.message),
            StatusLevel::Danger => error!(level = %update.level, "{}", update.message),
        }
    }
}
