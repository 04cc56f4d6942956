// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image sources and decoding
//!
//! An [`ImageSource`] is anything that can be turned into a pixel buffer:
//! raw bytes, base64, a `data:` URL (what a browser file picker hands over),
//! a local file chosen by the user, or an http(s) URL.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::error::OcrError;

/// Maximum image size (10MB)
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,

    #[error("Failed to read image: {0}")]
    Unreadable(String),
}

impl From<ImageError> for OcrError {
    fn from(err: ImageError) -> Self {
        OcrError::InvalidImage(err.to_string())
    }
}

/// Where an image comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Base64(String),
    /// `data:image/png;base64,...`
    DataUrl(String),
    Path(PathBuf),
    /// http(s) URL
    Url(String),
}

impl ImageSource {
    /// Classify a user-supplied reference (CLI argument, form field)
    pub fn from_reference(reference: &str) -> Self {
        let trimmed = reference.trim();
        if trimmed.starts_with("data:") {
            Self::DataUrl(trimmed.to_string())
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    /// Short description for logs, never the payload itself
    pub fn describe(&self) -> String {
        match self {
            Self::Bytes(b) => format!("{} raw bytes", b.len()),
            Self::Base64(s) => format!("{} base64 chars", s.len()),
            Self::DataUrl(s) => format!("data URL ({} chars)", s.len()),
            Self::Path(p) => p.display().to_string(),
            Self::Url(u) => u.clone(),
        }
    }

    /// Fetch the encoded image bytes
    ///
    /// Payloads over [`MAX_IMAGE_SIZE`] are refused before they are fully
    /// buffered: declared sizes are checked up front and reads stop one byte
    /// past the limit.
    pub async fn read_bytes(&self, client: &reqwest::Client) -> Result<Vec<u8>, ImageError> {
        let bytes = match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Base64(s) => {
                if s.is_empty() {
                    return Err(ImageError::EmptyData);
                }
                ensure_within_limit(base64_decoded_len(s.len()))?;
                STANDARD.decode(s)?
            }
            Self::DataUrl(url) => {
                ensure_within_limit(base64_decoded_len(url.len()))?;
                parse_data_url(url)?
            }
            Self::Path(path) => read_file_capped(path).await?,
            Self::Url(url) => {
                let mut response = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| ImageError::Unreadable(e.to_string()))?;
                if let Some(len) = response.content_length() {
                    ensure_within_limit(len)?;
                }

                let mut body = Vec::new();
                while let Some(chunk) = response
                    .chunk()
                    .await
                    .map_err(|e| ImageError::Unreadable(e.to_string()))?
                {
                    body.extend_from_slice(&chunk);
                    ensure_within_limit(body.len() as u64)?;
                }
                body
            }
        };
        ensure_within_limit(bytes.len() as u64)?;
        Ok(bytes)
    }
}

/// Upper bound of the decoded size of `encoded_len` base64 characters
fn base64_decoded_len(encoded_len: usize) -> u64 {
    (encoded_len as u64 / 4) * 3
}

fn ensure_within_limit(len: u64) -> Result<(), ImageError> {
    if len > MAX_IMAGE_SIZE as u64 {
        return Err(ImageError::TooLarge(
            usize::try_from(len).unwrap_or(usize::MAX),
            MAX_IMAGE_SIZE,
        ));
    }
    Ok(())
}

async fn read_file_capped(path: &Path) -> Result<Vec<u8>, ImageError> {
    let unreadable =
        |e: std::io::Error| ImageError::Unreadable(format!("{}: {}", path.display(), e));

    let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
    ensure_within_limit(metadata.len())?;

    // The file may grow between the size check and the read
    let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    file.take(MAX_IMAGE_SIZE as u64 + 1)
        .read_to_end(&mut bytes)
        .await
        .map_err(unreadable)?;
    ensure_within_limit(bytes.len() as u64)?;
    Ok(bytes)
}

/// Image information extracted during loading
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub size_bytes: usize,
}

/// Extract the payload of a base64 `data:` URL
pub fn parse_data_url(url: &str) -> Result<Vec<u8>, ImageError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::InvalidDataUrl("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::InvalidDataUrl("missing ',' separator".into()))?;
    if !meta.ends_with(";base64") {
        return Err(ImageError::InvalidDataUrl(
            "only base64 data URLs are supported".into(),
        ));
    }
    if payload.is_empty() {
        return Err(ImageError::EmptyData);
    }
    Ok(STANDARD.decode(payload)?)
}

/// Decode a base64-encoded image
pub fn decode_base64_image(base64_str: &str) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if base64_str.is_empty() {
        return Err(ImageError::EmptyData);
    }
    let bytes = STANDARD.decode(base64_str)?;
    decode_image_bytes(&bytes)
}

/// Decode raw image bytes
pub fn decode_image_bytes(bytes: &[u8]) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge(bytes.len(), MAX_IMAGE_SIZE));
    }

    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let format = detect_format(bytes)?;

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    let info = ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        size_bytes: bytes.len(),
    };

    Ok((img, info))
}

/// Detect image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF87a / GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        // TIFF: II or MM
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Ok(ImageFormat::Tiff),

        _ => Err(ImageError::UnsupportedFormat),
    }
}
