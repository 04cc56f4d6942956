// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference request handler
//!
//! Turns an [`ImageSource`] into cleaned text using a shared [`ModelSession`].
//! Every outcome, including rejection, comes back as an [`InferenceResult`];
//! the handler never panics or aborts on a bad request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::postprocess::clean_output;
use super::session::{LoadedModel, ModelSession};
use super::status::StatusUpdate;
use super::types::{InferenceRequest, InferenceResult};
use crate::config::GenerationConfig;
use crate::error::OcrError;
use crate::vision::image_utils::{decode_image_bytes, ImageSource};

pub struct OcrHandler {
    session: Arc<ModelSession>,
    http: reqwest::Client,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a request finishes
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OcrHandler {
    pub fn new(session: Arc<ModelSession>) -> Self {
        Self {
            session,
            http: reqwest::Client::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Use a preconfigured HTTP client for `ImageSource::Url`
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }

    /// True while at least one request is being processed
    ///
    /// Overlapping calls are not serialized here; hosts use this to keep
    /// input disabled until the current request finishes.
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Extract text from `image` with the configured instruction
    pub async fn run(&self, image: ImageSource) -> InferenceResult {
        self.run_with_cancel(image, CancellationToken::new()).await
    }

    /// [`run`](Self::run) that stops between decoding steps when `cancel` fires
    pub async fn run_with_cancel(
        &self,
        image: ImageSource,
        cancel: CancellationToken,
    ) -> InferenceResult {
        let request = InferenceRequest::new(image, self.session.config().instruction.clone());
        self.run_request(request, cancel).await
    }

    /// Process a prepared request
    pub async fn run_request(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> InferenceResult {
        let start = Instant::now();
        let reporter = self.session.reporter();

        // Rejected requests never reach the processor or the model
        let loaded = match self.session.loaded().await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(request_id = %request.id, "Request rejected: {}", err);
                reporter.report(&StatusUpdate::error(&err));
                return InferenceResult::failure(request.id, err, elapsed_ms(start));
            }
        };

        let _guard = InFlightGuard::enter(&self.in_flight);
        reporter.report(&StatusUpdate::processing());
        debug!(
            request_id = %request.id,
            image = %request.image.describe(),
            "Processing OCR request"
        );

        let generation = self.session.config().generation.clone();
        match self.process(loaded, &request, generation, cancel).await {
            Ok((text, tokens_generated)) => {
                let processing_time_ms = elapsed_ms(start);
                info!(
                    request_id = %request.id,
                    chars = text.len(),
                    tokens = tokens_generated,
                    processing_time_ms,
                    "OCR complete"
                );
                reporter.report(&StatusUpdate::done());
                InferenceResult::success(request.id, text, tokens_generated, processing_time_ms)
            }
            Err(err) => {
                warn!(request_id = %request.id, "OCR failed: {}", err);
                reporter.report(&StatusUpdate::error(&err));
                InferenceResult::failure(request.id, err, elapsed_ms(start))
            }
        }
    }

    async fn process(
        &self,
        loaded: LoadedModel,
        request: &InferenceRequest,
        generation: GenerationConfig,
        cancel: CancellationToken,
    ) -> Result<(String, usize), OcrError> {
        let bytes = tokio::select! {
            bytes = request.image.read_bytes(&self.http) => bytes?,
            _ = cancel.cancelled() => {
                return Err(OcrError::Cancelled("request cancelled while reading image".into()));
            }
        };

        let instruction = request.instruction.clone();
        let request_id = request.id;

        tokio::task::spawn_blocking(move || {
            let (image, info) = decode_image_bytes(&bytes)?;
            debug!(
                %request_id,
                width = info.width,
                height = info.height,
                format = ?info.format,
                size_bytes = info.size_bytes,
                "Decoded image"
            );

            let inputs = loaded.processor.prepare(&image, &instruction)?;
            let output = loaded.model.generate(&inputs, &generation, &cancel)?;

            let prompt_text = loaded.processor.decode(&inputs.input_ids, true)?;
            let mut sequence = inputs.input_ids.clone();
            sequence.extend_from_slice(&output.tokens);
            let full_text = loaded.processor.decode(&sequence, true)?;

            debug!(
                %request_id,
                finish_reason = ?output.finish_reason,
                "Generation finished"
            );
            let text = clean_output(&full_text, &prompt_text, &instruction);
            Ok((text, output.tokens.len()))
        })
        .await
        .map_err(|e| OcrError::Generation(format!("inference task failed: {}", e)))?
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
