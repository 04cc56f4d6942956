// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! SmolVLM loader tests
//!
//! Exercises artifact resolution and failure classification through the
//! public session API without touching the network. The real hub test is
//! ignored by default (needs network and ~500MB of downloads).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use vlm_ocr::config::{ExecutionBackend, OcrConfig};
use vlm_ocr::error::{InitFailureKind, OcrError};
use vlm_ocr::inference::{InputProcessor, ModelLoader, ModelSession, OcrHandler, SessionStatus};
use vlm_ocr::models::ModelSource;
use vlm_ocr::vision::image_utils::ImageSource;
use vlm_ocr::vision::smolvlm::SmolVlmLoader;

/// Every fetch fails as if the network were down
#[derive(Default)]
struct OfflineSource {
    fetches: AtomicUsize,
}

#[async_trait]
impl ModelSource for OfflineSource {
    async fn fetch(
        &self,
        model_id: &str,
        _revision: &str,
        file: &str,
    ) -> Result<PathBuf, OcrError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(OcrError::download_failed(format!(
            "{}/{}: dns error: failed to lookup address",
            model_id, file
        )))
    }
}

/// Serves files from a local directory, missing files are invalid artifacts
struct LocalDirSource {
    root: PathBuf,
}

#[async_trait]
impl ModelSource for LocalDirSource {
    async fn fetch(
        &self,
        model_id: &str,
        _revision: &str,
        file: &str,
    ) -> Result<PathBuf, OcrError> {
        let path = self.root.join(file);
        if path.exists() {
            Ok(path)
        } else {
            Err(OcrError::artifact_invalid(format!(
                "{} not found in {}",
                file, model_id
            )))
        }
    }
}

fn cpu_config() -> OcrConfig {
    OcrConfig {
        device: ExecutionBackend::Cpu,
        ..Default::default()
    }
}

/// Word-level tokenizer carrying the SmolVLM special tokens
fn write_tokenizer(dir: &Path) {
    let specials = [
        "<unk>",
        "<|im_start|>",
        "<image>",
        "<fake_token_around_image>",
        "<global-img>",
        "<end_of_utterance>",
        "<|im_end|>",
        "<row_1_col_1>",
        "<row_1_col_2>",
    ];
    let words = [
        "User", ":", "Extract", "all", "text", "from", "this", "image", ".", "Assistant",
    ];

    let mut vocab = serde_json::Map::new();
    for (id, token) in specials.iter().chain(words.iter()).enumerate() {
        vocab.insert(token.to_string(), serde_json::json!(id));
    }
    let added: Vec<_> = specials
        .iter()
        .enumerate()
        .map(|(id, token)| {
            serde_json::json!({
                "id": id, "content": token, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        })
        .collect();

    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added,
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
    });
    std::fs::write(dir.join("tokenizer.json"), json.to_string()).unwrap();
}

fn write_processor_files(dir: &Path) {
    write_tokenizer(dir);
    std::fs::write(
        dir.join("config.json"),
        r#"{"text_config": {"num_hidden_layers": 2, "num_attention_heads": 4,
            "num_key_value_heads": 1, "hidden_size": 64}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("preprocessor_config.json"),
        r#"{"do_image_splitting": false, "max_image_size": {"longest_edge": 16}}"#,
    )
    .unwrap();
}

#[tokio::test]
async fn test_offline_source_fails_with_download_error() {
    let loader = SmolVlmLoader::new(Arc::new(OfflineSource::default()));
    let session = Arc::new(ModelSession::new(cpu_config(), Arc::new(loader)));

    let err = session.initialize().await.unwrap_err();
    assert_eq!(err.init_kind(), Some(InitFailureKind::DownloadFailed));
    assert!(matches!(session.status().await, SessionStatus::Failed(_)));

    // A failed session rejects requests instead of processing them
    let handler = OcrHandler::new(session);
    let result = handler.run(ImageSource::Bytes(vec![0x89, b'P', b'N', b'G'])).await;
    assert!(result.error().unwrap().is_rejected());
}

#[tokio::test]
async fn test_missing_artifacts_are_invalid() {
    let dir = TempDir::new().unwrap();
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));
    let session = ModelSession::new(cpu_config(), Arc::new(loader));

    let err = session.initialize().await.unwrap_err();
    assert_eq!(err.init_kind(), Some(InitFailureKind::ArtifactInvalid));
    assert!(err.to_string().contains("config.json"));
}

#[tokio::test]
async fn test_missing_graph_is_invalid() {
    let dir = TempDir::new().unwrap();
    write_processor_files(dir.path());
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));

    let err = loader.load_model(&cpu_config()).await.err().unwrap();
    assert_eq!(err.init_kind(), Some(InitFailureKind::ArtifactInvalid));
    assert!(err.to_string().contains("onnx/embed_tokens"));
}

#[tokio::test]
async fn test_processor_loads_from_local_files() {
    let dir = TempDir::new().unwrap();
    write_processor_files(dir.path());
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));

    let processor = loader.load_processor(&cpu_config()).await.unwrap();
    let image = image::DynamicImage::new_rgb8(20, 10);
    let inputs = processor
        .prepare(&image, "Extract all text from this image.")
        .unwrap();

    // No processor_config.json: one image expands to 64 placeholders
    let placeholders = inputs
        .input_ids
        .iter()
        .filter(|&&id| id == inputs.image_token_id)
        .count();
    assert_eq!(placeholders, 64);
    assert_eq!(inputs.image_token_id, 2);
    assert!(inputs.stop_token_ids.contains(&5));
    assert_eq!(inputs.pixels.pixel_values.shape(), &[1, 1, 3, 16, 16]);
}

#[tokio::test]
async fn test_processor_config_sets_sequence_length() {
    let dir = TempDir::new().unwrap();
    write_processor_files(dir.path());
    std::fs::write(dir.path().join("processor_config.json"), r#"{"image_seq_len": 9}"#).unwrap();
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));

    let processor = loader.load_processor(&cpu_config()).await.unwrap();
    let inputs = processor
        .prepare(&image::DynamicImage::new_rgb8(4, 4), "Extract all text from this image.")
        .unwrap();
    assert_eq!(
        inputs.input_ids.iter().filter(|&&id| id == 2).count(),
        9
    );
}

#[tokio::test]
async fn test_image_splitting_follows_preprocessor_config() {
    let dir = TempDir::new().unwrap();
    write_processor_files(dir.path());
    std::fs::write(
        dir.path().join("preprocessor_config.json"),
        r#"{"do_image_splitting": true, "size": {"longest_edge": 32},
            "max_image_size": {"longest_edge": 16}}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("processor_config.json"), r#"{"image_seq_len": 4}"#).unwrap();
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));
    let image = image::DynamicImage::new_rgb8(40, 20);
    let instruction = "Extract all text from this image.";

    // 40x20 → 32x16 → two 16px tiles plus the global view
    let processor = loader.load_processor(&cpu_config()).await.unwrap();
    let inputs = processor.prepare(&image, instruction).unwrap();
    assert_eq!(inputs.pixels.pixel_values.shape(), &[1, 3, 3, 16, 16]);
    assert_eq!(inputs.input_ids.iter().filter(|&&id| id == 2).count(), 12);

    let config = OcrConfig {
        image_splitting: false,
        ..cpu_config()
    };
    let processor = loader.load_processor(&config).await.unwrap();
    let inputs = processor.prepare(&image, instruction).unwrap();
    assert_eq!(inputs.pixels.pixel_values.shape(), &[1, 1, 3, 16, 16]);
    assert_eq!(inputs.input_ids.iter().filter(|&&id| id == 2).count(), 4);
}

#[tokio::test]
async fn test_corrupt_tokenizer_is_invalid() {
    let dir = TempDir::new().unwrap();
    write_processor_files(dir.path());
    std::fs::write(dir.path().join("tokenizer.json"), "{ not json").unwrap();
    let loader = SmolVlmLoader::new(Arc::new(LocalDirSource {
        root: dir.path().to_path_buf(),
    }));

    let err = loader.load_processor(&cpu_config()).await.err().unwrap();
    assert_eq!(err.init_kind(), Some(InitFailureKind::ArtifactInvalid));
}

#[tokio::test]
async fn test_unsupported_backend_fails_before_download() {
    if ExecutionBackend::Cuda.execution_providers().is_ok() {
        eprintln!("CUDA available, skipping");
        return;
    }

    let source = Arc::new(OfflineSource::default());
    let loader = SmolVlmLoader::new(source.clone());
    let config = OcrConfig {
        device: ExecutionBackend::Cuda,
        ..Default::default()
    };
    let session = ModelSession::new(config, Arc::new(loader));

    let err = session.initialize().await.unwrap_err();
    assert_eq!(err.init_kind(), Some(InitFailureKind::BackendUnsupported));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[ignore] // Downloads the real model from the Hugging Face Hub
async fn test_real_model_end_to_end() {
    let config = OcrConfig::from_env();
    let loader = SmolVlmLoader::from_config(&config).unwrap();
    let session = Arc::new(ModelSession::new(config, Arc::new(loader)));
    session.initialize().await.unwrap();

    let mut img = image::RgbImage::from_pixel(256, 64, image::Rgb([255, 255, 255]));
    for x in 20..236 {
        for y in 28..36 {
            img.put_pixel(x, y, image::Rgb([0, 0, 0]));
        }
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();

    let handler = OcrHandler::new(session);
    let result = handler.run(ImageSource::Bytes(bytes)).await;
    assert!(result.is_success(), "{:?}", result.error());
    assert!(result.tokens_generated <= 1024);
    println!("Extracted: {}", result.text);
}
