// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Inference request handler tests
//!
//! Drives the handler end to end with a fake processor and a scripted model
//! running the real greedy decoding loop.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use vlm_ocr::config::OcrConfig;
use vlm_ocr::error::OcrError;
use vlm_ocr::inference::{InferenceRequest, InferenceStatus, ModelSession, OcrHandler, StatusLevel};
use vlm_ocr::vision::image_utils::ImageSource;

use super::common::*;

async fn ready_handler(
    loader: StaticLoader,
    config: OcrConfig,
) -> (OcrHandler, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let session =
        Arc::new(ModelSession::new(config, Arc::new(loader)).with_reporter(reporter.clone()));
    session.initialize().await.unwrap();
    reporter.updates.lock().unwrap().clear();
    (OcrHandler::new(session), reporter)
}

#[tokio::test]
async fn test_run_before_initialize_is_rejected() {
    let mut model = MockModel::new();
    model.expect_generate().times(0);
    let mut processor = MockProcessor::new();
    processor.expect_prepare().times(0);
    processor.expect_decode().times(0);

    let loader = StaticLoader::new(Arc::new(processor), Arc::new(model));
    let session = Arc::new(ModelSession::new(OcrConfig::default(), Arc::new(loader)));
    let handler = OcrHandler::new(session);

    let result = handler.run(ImageSource::Bytes(png_bytes())).await;

    assert!(matches!(
        result.status,
        InferenceStatus::Failed(OcrError::RequestRejected { .. })
    ));
    assert!(result.text.is_empty());
    assert_eq!(result.tokens_generated, 0);
}

#[tokio::test]
async fn test_successful_run_returns_cleaned_text() {
    let (handler, reporter) =
        ready_handler(fake_loader(&[13, 10, 11, STOP_TOKEN_ID]), OcrConfig::default()).await;

    let result = handler.run(ImageSource::Bytes(png_bytes())).await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error());
    assert_eq!(result.text, "Hello World");
    assert!(!result.text.starts_with(INSTRUCTION));
    assert!(!result.text.starts_with("A:"));
    assert_eq!(result.tokens_generated, 3);
    assert_eq!(
        reporter.messages(),
        vec!["Processing...".to_string(), "Done!".to_string()]
    );
}

#[tokio::test]
async fn test_invalid_image_never_reaches_model() {
    let mut model = MockModel::new();
    model.expect_generate().times(0);
    let loader = StaticLoader::new(Arc::new(FakeProcessor), Arc::new(model));
    let (handler, reporter) = ready_handler(loader, OcrConfig::default()).await;

    let result = handler
        .run(ImageSource::Bytes(b"definitely not an image".to_vec()))
        .await;

    assert!(matches!(result.error(), Some(OcrError::InvalidImage(_))));
    let last = reporter.updates.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.level, StatusLevel::Danger);
    // The session stays usable
    assert!(handler.session().is_ready().await);
}

#[tokio::test]
async fn test_token_cap_is_respected() {
    let mut config = OcrConfig::default();
    config.generation.max_new_tokens = 5;
    let (handler, _) = ready_handler(fake_loader(&[10]), config).await;

    let result = handler.run(ImageSource::Bytes(png_bytes())).await;

    assert!(result.is_success());
    assert_eq!(result.tokens_generated, 5);
    assert_eq!(result.text, "Hello Hello Hello Hello Hello");
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    let (handler, _) =
        ready_handler(fake_loader(&[10, 12, 11, STOP_TOKEN_ID]), OcrConfig::default()).await;

    let first = handler.run(ImageSource::Bytes(png_bytes())).await;
    let second = handler.run(ImageSource::Bytes(png_bytes())).await;

    assert_eq!(first.text, "Hello again World");
    assert_eq!(first.text, second.text);
    assert_eq!(first.tokens_generated, second.tokens_generated);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn test_model_failure_is_reported() {
    let mut model = MockModel::new();
    model
        .expect_generate()
        .times(1)
        .returning(|_, _, _| Err(OcrError::Generation("decoder exploded".into())));
    let loader = StaticLoader::new(Arc::new(FakeProcessor), Arc::new(model));
    let (handler, reporter) = ready_handler(loader, OcrConfig::default()).await;

    let result = handler.run(ImageSource::Bytes(png_bytes())).await;

    assert_eq!(
        result.error(),
        Some(&OcrError::Generation("decoder exploded".into()))
    );
    let messages = reporter.messages();
    assert_eq!(messages.first().map(String::as_str), Some("Processing..."));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Error: Generation failed: decoder exploded")
    );
}

#[tokio::test]
async fn test_cancelled_request() {
    let (handler, _) = ready_handler(fake_loader(&[10]), OcrConfig::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = handler
        .run_with_cancel(ImageSource::Bytes(png_bytes()), cancel)
        .await;

    assert!(matches!(result.error(), Some(OcrError::Cancelled(_))));
    assert!(!handler.is_processing());
}

#[tokio::test]
async fn test_not_processing_after_run() {
    let (handler, _) =
        ready_handler(fake_loader(&[10, STOP_TOKEN_ID]), OcrConfig::default()).await;
    assert!(!handler.is_processing());
    let _ = handler.run(ImageSource::Bytes(png_bytes())).await;
    assert!(!handler.is_processing());
}

#[tokio::test]
async fn test_custom_instruction_request() {
    let (handler, _) =
        ready_handler(fake_loader(&[11, STOP_TOKEN_ID]), OcrConfig::default()).await;
    let request = InferenceRequest::new(ImageSource::Bytes(png_bytes()), "Read the sign.");

    let result = handler
        .run_request(request.clone(), CancellationToken::new())
        .await;

    assert_eq!(result.request_id, request.id);
    assert_eq!(result.text, "World");
}

#[tokio::test]
async fn test_image_source_variants() {
    let (handler, _) =
        ready_handler(fake_loader(&[10, STOP_TOKEN_ID]), OcrConfig::default()).await;
    let bytes = png_bytes();

    let base64 = ImageSource::Base64(STANDARD.encode(&bytes));
    assert_eq!(handler.run(base64).await.text, "Hello");

    let data_url = ImageSource::from_reference(&format!(
        "data:image/png;base64,{}",
        STANDARD.encode(&bytes)
    ));
    assert_eq!(handler.run(data_url).await.text, "Hello");

    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(&bytes).unwrap();
    let path = ImageSource::from_reference(file.path().to_str().unwrap());
    assert_eq!(handler.run(path).await.text, "Hello");

    let missing = ImageSource::from_reference("/nonexistent/receipt.png");
    assert!(matches!(
        handler.run(missing).await.error(),
        Some(OcrError::InvalidImage(_))
    ));
}
