// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Cli;
use crate::inference::{
    InferenceReport, InferenceResult, ModelSession, OcrHandler, StatusLevel, StatusReporter,
    StatusUpdate,
};
use crate::version;
use crate::vision::image_utils::ImageSource;
use crate::vision::smolvlm::SmolVlmLoader;

/// Prints status updates to stderr so stdout carries only extracted text
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    fn icon(level: StatusLevel) -> &'static str {
        match level {
            StatusLevel::Info => "⏳",
            StatusLevel::Success => "✅",
            StatusLevel::Warning => "🔄",
            StatusLevel::Danger => "❌",
        }
    }
}

impl StatusReporter for ConsoleReporter {
    fn report(&self, update: &StatusUpdate) {
        eprintln!("{} {}", Self::icon(update.level), update.message);
    }
}

#[derive(Serialize)]
struct ImageOutput<'a> {
    image: &'a str,
    #[serde(flatten)]
    report: InferenceReport,
}

fn print_result(image: &str, result: &InferenceResult, json: bool, multiple: bool) -> Result<()> {
    if json {
        let output = ImageOutput {
            image,
            report: result.to_report(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if result.is_success() {
        if multiple {
            println!("==> {} <==", image);
        }
        println!("{}", result.text);
    }
    Ok(())
}

/// Initialize a session, then extract text from every image in order
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    info!("{}", version::get_version_string());

    let loader = SmolVlmLoader::from_config(&config)?;
    let session = Arc::new(
        ModelSession::new(config, Arc::new(loader)).with_reporter(Arc::new(ConsoleReporter)),
    );

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            ctrl_c_token.cancel();
        }
    });

    session
        .initialize_with_cancel(cancel.clone())
        .await
        .context("Model initialization failed")?;

    // Requests are submitted one at a time
    let handler = OcrHandler::new(session);
    let multiple = cli.images.len() > 1;
    let mut failures = 0usize;

    for image in &cli.images {
        if cancel.is_cancelled() {
            break;
        }
        let result = handler
            .run_with_cancel(ImageSource::from_reference(image), cancel.clone())
            .await;
        if !result.is_success() {
            failures += 1;
        }
        print_result(image, &result, cli.json, multiple)?;
    }

    if cancel.is_cancelled() {
        bail!("Cancelled");
    }
    if failures > 0 {
        bail!("{} of {} images failed", failures, cli.images.len());
    }
    Ok(())
}
