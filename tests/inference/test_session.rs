// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Model session lifecycle tests
//!
//! Covers the Uninitialized → Loading → Ready | Failed transitions,
//! re-initialization after failure, overlapping initialization and status
//! reporting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use vlm_ocr::config::OcrConfig;
use vlm_ocr::error::{InitFailureKind, OcrError};
use vlm_ocr::inference::{ModelSession, OcrHandler, SessionStatus, StatusLevel};
use vlm_ocr::vision::image_utils::ImageSource;

use super::common::{fake_loader, png_bytes, FlakyLoader, GatedLoader, RecordingReporter};

#[tokio::test]
async fn test_new_session_is_uninitialized() {
    let session = ModelSession::new(OcrConfig::default(), Arc::new(fake_loader(&[10])));
    assert_eq!(session.status().await, SessionStatus::Uninitialized);
    assert!(!session.is_ready().await);
}

#[tokio::test]
async fn test_initialize_reports_loading_then_ready() {
    let reporter = Arc::new(RecordingReporter::default());
    let session = ModelSession::new(OcrConfig::default(), Arc::new(fake_loader(&[10])))
        .with_reporter(reporter.clone());

    session.initialize().await.unwrap();

    assert_eq!(session.status().await, SessionStatus::Ready);
    let messages = reporter.messages();
    assert_eq!(
        messages,
        vec![
            "Loading HuggingFaceTB/SmolVLM-256M-Instruct...".to_string(),
            "Ready! Select an image.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_initialization_keeps_reason() {
    let reporter = Arc::new(RecordingReporter::default());
    let loader = FlakyLoader {
        error: OcrError::download_failed("connection refused"),
        failures: AtomicUsize::new(1),
        inner: fake_loader(&[10]),
    };
    let session =
        ModelSession::new(OcrConfig::default(), Arc::new(loader)).with_reporter(reporter.clone());

    let err = session.initialize().await.unwrap_err();
    assert_eq!(err.init_kind(), Some(InitFailureKind::DownloadFailed));

    match session.status().await {
        SessionStatus::Failed(reason) => assert!(reason.to_string().contains("connection refused")),
        other => panic!("expected Failed, got {:?}", other),
    }

    let last = reporter.updates.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.level, StatusLevel::Danger);
    assert!(last.message.starts_with("Error: "));
}

#[tokio::test]
async fn test_reinitialize_after_failure_reaches_ready() {
    let loader = FlakyLoader {
        error: OcrError::download_failed("timeout"),
        failures: AtomicUsize::new(1),
        inner: fake_loader(&[10]),
    };
    let session = ModelSession::new(OcrConfig::default(), Arc::new(loader));

    assert!(session.initialize().await.is_err());
    assert!(matches!(session.status().await, SessionStatus::Failed(_)));

    session.initialize().await.unwrap();
    assert_eq!(session.status().await, SessionStatus::Ready);
}

#[tokio::test]
async fn test_no_automatic_retry() {
    let loader = Arc::new(FlakyLoader {
        error: OcrError::download_failed("offline"),
        failures: AtomicUsize::new(5),
        inner: fake_loader(&[10]),
    });
    let session = ModelSession::new(OcrConfig::default(), loader.clone());

    assert!(session.initialize().await.is_err());
    // Exactly one attempt consumed
    assert_eq!(loader.failures.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_overlapping_initialize_is_rejected() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let loader = GatedLoader {
        started: started.clone(),
        release: release.clone(),
        inner: fake_loader(&[10]),
    };
    let session = Arc::new(ModelSession::new(OcrConfig::default(), Arc::new(loader)));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.initialize().await })
    };
    started.notified().await;
    assert_eq!(session.status().await, SessionStatus::Loading);

    let err = session.initialize().await.unwrap_err();
    assert!(err.is_rejected());

    release.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(session.status().await, SessionStatus::Ready);
}

#[tokio::test]
async fn test_run_while_loading_is_rejected() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let loader = GatedLoader {
        started: started.clone(),
        release: release.clone(),
        inner: fake_loader(&[10]),
    };
    let session = Arc::new(ModelSession::new(OcrConfig::default(), Arc::new(loader)));
    let handler = OcrHandler::new(session.clone());

    let init = {
        let session = session.clone();
        tokio::spawn(async move { session.initialize().await })
    };
    started.notified().await;

    let result = handler.run(ImageSource::Bytes(png_bytes())).await;
    assert!(result.error().unwrap().is_rejected());

    release.notify_one();
    init.await.unwrap().unwrap();
    assert!(handler.run(ImageSource::Bytes(png_bytes())).await.is_success());
}

#[tokio::test]
async fn test_cancel_during_load() {
    let started = Arc::new(Notify::new());
    let loader = GatedLoader {
        started: started.clone(),
        release: Arc::new(Notify::new()),
        inner: fake_loader(&[10]),
    };
    let session = Arc::new(ModelSession::new(OcrConfig::default(), Arc::new(loader)));
    let cancel = CancellationToken::new();

    let init = {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.initialize_with_cancel(cancel).await })
    };
    started.notified().await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), init)
        .await
        .expect("initialization did not observe cancellation")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, OcrError::Cancelled(_)));
    assert!(matches!(
        session.status().await,
        SessionStatus::Failed(OcrError::Cancelled(_))
    ));
}

#[tokio::test]
async fn test_isolated_sessions_coexist() {
    let ready = ModelSession::new(OcrConfig::default(), Arc::new(fake_loader(&[10])));
    let failing = ModelSession::new(
        OcrConfig::default(),
        Arc::new(FlakyLoader {
            error: OcrError::artifact_invalid("bad graph"),
            failures: AtomicUsize::new(1),
            inner: fake_loader(&[10]),
        }),
    );

    ready.initialize().await.unwrap();
    assert!(failing.initialize().await.is_err());

    assert!(ready.is_ready().await);
    assert!(!failing.is_ready().await);
}
