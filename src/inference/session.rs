// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model session lifecycle
//!
//! A [`ModelSession`] owns one processor + model pair. It is created once by
//! the host and shared (usually as `Arc<ModelSession>`) with every request
//! handler; nothing here is global, so tests can run isolated sessions side by
//! side.
//!
//! ```text
//! Uninitialized ──initialize()──► Loading ──► Ready
//!                                    │
//!                                    └──────► Failed(reason) ──initialize()──► Loading ...
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::status::{StatusReporter, StatusUpdate, TracingReporter};
use super::traits::{InputProcessor, ModelLoader, VisionLanguageModel};
use crate::config::OcrConfig;
use crate::error::OcrError;

/// Observable session status
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Uninitialized,
    Loading,
    Ready,
    /// Initialization failed; the error is kept for display
    Failed(OcrError),
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Loading => f.write_str("loading"),
            Self::Ready => f.write_str("ready"),
            Self::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Handles to a loaded processor and model
#[derive(Clone)]
pub struct LoadedModel {
    pub processor: Arc<dyn InputProcessor>,
    pub model: Arc<dyn VisionLanguageModel>,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel").finish_non_exhaustive()
    }
}

enum SessionState {
    Uninitialized,
    Loading,
    Ready(LoadedModel),
    Failed(OcrError),
}

pub struct ModelSession {
    config: OcrConfig,
    loader: Arc<dyn ModelLoader>,
    reporter: Arc<dyn StatusReporter>,
    state: RwLock<SessionState>,
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("model_id", &self.config.model_id)
            .field("device", &self.config.device)
            .finish_non_exhaustive()
    }
}

impl ModelSession {
    /// Create an uninitialized session; nothing is loaded until [`initialize`](Self::initialize)
    pub fn new(config: OcrConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            reporter: Arc::new(TracingReporter),
            state: RwLock::new(SessionState::Uninitialized),
        }
    }

    /// Replace the status reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    pub fn reporter(&self) -> Arc<dyn StatusReporter> {
        self.reporter.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.read().await {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Loading => SessionStatus::Loading,
            SessionState::Ready(_) => SessionStatus::Ready,
            SessionState::Failed(err) => SessionStatus::Failed(err.clone()),
        }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.read().await, SessionState::Ready(_))
    }

    /// Load the processor and model
    ///
    /// May be called again after a failure (or to reload a ready session).
    /// There is no automatic retry.
    ///
    /// # Errors
    /// - `RequestRejected` if another initialization is in progress
    /// - `Initialization` / `Config` if loading fails; the session becomes `Failed`
    pub async fn initialize(&self) -> Result<(), OcrError> {
        self.initialize_with_cancel(CancellationToken::new()).await
    }

    /// [`initialize`](Self::initialize) that gives up when `cancel` fires
    pub async fn initialize_with_cancel(&self, cancel: CancellationToken) -> Result<(), OcrError> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, SessionState::Loading) {
                return Err(OcrError::rejected("initialization already in progress"));
            }
            *state = SessionState::Loading;
        }

        self.reporter
            .report(&StatusUpdate::loading(&self.config.model_id));
        info!(
            model_id = %self.config.model_id,
            device = %self.config.device,
            "Initializing model session"
        );
        let start = Instant::now();

        let outcome = tokio::select! {
            result = self.load() => result,
            _ = cancel.cancelled() => Err(OcrError::Cancelled("initialization cancelled".into())),
        };

        match outcome {
            Ok(loaded) => {
                *self.state.write().await = SessionState::Ready(loaded);
                info!(
                    model_id = %self.config.model_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "✅ Model session ready"
                );
                self.reporter.report(&StatusUpdate::ready());
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = SessionState::Failed(err.clone());
                warn!(model_id = %self.config.model_id, "⚠️ Model session failed: {}", err);
                self.reporter.report(&StatusUpdate::error(&err));
                Err(err)
            }
        }
    }

    async fn load(&self) -> Result<LoadedModel, OcrError> {
        self.config.validate()?;
        let model = self.loader.load_model(&self.config).await?;
        let processor = self.loader.load_processor(&self.config).await?;
        Ok(LoadedModel { processor, model })
    }

    /// Handles for a request, or `RequestRejected` unless the session is ready
    pub async fn loaded(&self) -> Result<LoadedModel, OcrError> {
        match &*self.state.read().await {
            SessionState::Ready(loaded) => Ok(loaded.clone()),
            SessionState::Uninitialized => Err(OcrError::rejected("session is not initialized")),
            SessionState::Loading => Err(OcrError::rejected("model is still loading")),
            SessionState::Failed(err) => Err(OcrError::rejected(format!(
                "session failed to initialize: {}",
                err
            ))),
        }
    }
}
