// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for vlm-ocr

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = "2025-11-04";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "smolvlm-onnx",
    "hub-download",
    "kv-cache-decoding",
    "greedy-repetition-penalty",
    "cpu-cuda-backends",
    "per-component-precision",
    "cancellation",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("vlm-ocr {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info as JSON
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "date": BUILD_DATE,
        "features": FEATURES,
    })
}
