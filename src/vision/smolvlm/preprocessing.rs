// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the SmolVLM vision encoder
//!
//! With splitting enabled an image becomes `rows × cols` square tiles
//! (row-major) followed by one global view; otherwise only the global view is
//! produced. Every frame is `S × S` with `S = max_image_size.longest_edge`.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array4, Array5};
use serde::Deserialize;

/// Default square input size of the vision encoder
pub const DEFAULT_INPUT_SIZE: u32 = 512;

/// Default longest edge an image is resized to before tiling
pub const DEFAULT_RESIZE_LONGEST_EDGE: u32 = 2048;

/// SigLIP-style normalization used by SmolVLM
pub const DEFAULT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const DEFAULT_STD: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LongestEdge {
    pub longest_edge: u32,
}

/// Subset of `preprocessor_config.json` the encoder input depends on
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageProcessorConfig {
    pub do_resize: bool,
    /// Target longest edge before tiling
    pub size: LongestEdge,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    /// Split the resized image into encoder-sized tiles plus a global view
    pub do_image_splitting: bool,
    /// Encoder input size
    pub max_image_size: LongestEdge,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: LongestEdge {
                longest_edge: DEFAULT_RESIZE_LONGEST_EDGE,
            },
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: DEFAULT_MEAN,
            image_std: DEFAULT_STD,
            do_image_splitting: false,
            max_image_size: LongestEdge {
                longest_edge: DEFAULT_INPUT_SIZE,
            },
        }
    }
}

impl ImageProcessorConfig {
    pub fn input_size(&self) -> u32 {
        self.max_image_size.longest_edge
    }
}

/// How the global view is fitted into the square encoder input
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ResizeMode {
    /// Resize to exact size (may distort aspect ratio), as the upstream
    /// processor does for its global image
    #[default]
    Stretch,
    /// Keep aspect ratio, pad the rest and mask it out
    Letterbox,
}

/// Encoder inputs for a single image
#[derive(Debug, Clone)]
pub struct PixelInputs {
    /// `[batch=1, frames, 3, S, S]`; tiles first, global view last
    pub pixel_values: Array5<f32>,
    /// `[batch=1, frames, S, S]`, true where real pixels are
    pub pixel_attention_mask: Array4<bool>,
    /// Tile grid; `0 × 0` when only the global view is present
    pub rows: usize,
    pub cols: usize,
}

impl PixelInputs {
    /// Frames per image: `rows * cols` tiles plus the global view
    pub fn num_frames(&self) -> usize {
        self.pixel_values.shape()[1]
    }
}

/// Convert an image into normalized encoder inputs
pub fn preprocess_image(
    image: &DynamicImage,
    config: &ImageProcessorConfig,
    mode: ResizeMode,
) -> PixelInputs {
    let size = config.input_size().max(1);
    let (tiles, rows, cols) = if config.do_image_splitting {
        split_into_tiles(image, config, size)
    } else {
        (Vec::new(), 0, 0)
    };

    let s = size as usize;
    let frames = tiles.len() + 1;
    let mut pixel_values = Array5::<f32>::zeros((1, frames, 3, s, s));
    let mut pixel_attention_mask = Array4::<bool>::from_elem((1, frames, s, s), false);

    for (idx, tile) in tiles.iter().enumerate() {
        write_frame(
            &mut pixel_values,
            &mut pixel_attention_mask,
            idx,
            tile,
            size,
            ResizeMode::Stretch,
            config,
        );
    }
    write_frame(
        &mut pixel_values,
        &mut pixel_attention_mask,
        frames - 1,
        image,
        size,
        mode,
        config,
    );

    PixelInputs {
        pixel_values,
        pixel_attention_mask,
        rows,
        cols,
    }
}

/// Resize for tiling and cut into `size × size` crops, row-major
///
/// Images that fit in a single tile after resizing produce no crops.
fn split_into_tiles(
    image: &DynamicImage,
    config: &ImageProcessorConfig,
    size: u32,
) -> (Vec<DynamicImage>, usize, usize) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return (Vec::new(), 0, 0);
    }

    let (w, h) = if config.do_resize {
        longest_edge_size((w, h), config.size.longest_edge.max(1))
    } else {
        (w, h)
    };
    let (w, h) = tile_aligned_size((w, h), size);
    if w <= size && h <= size {
        return (Vec::new(), 0, 0);
    }

    let resized = image.resize_exact(w, h, FilterType::Lanczos3);
    let rows = h.div_ceil(size);
    let cols = w.div_ceil(size);
    let tile_h = h.div_ceil(rows);
    let tile_w = w.div_ceil(cols);

    let mut tiles = Vec::with_capacity((rows * cols) as usize);
    for r in 0..rows {
        for c in 0..cols {
            let x = c * tile_w;
            let y = r * tile_h;
            tiles.push(resized.crop_imm(x, y, tile_w.min(w - x), tile_h.min(h - y)));
        }
    }
    (tiles, rows as usize, cols as usize)
}

/// Scale so the longest edge equals `max_len`; the other edge is rounded up
/// to an even number
fn longest_edge_size((w, h): (u32, u32), max_len: u32) -> (u32, u32) {
    let aspect = w as f64 / h as f64;
    let (w, h) = if w >= h {
        let mut height = (max_len as f64 / aspect) as u32;
        if height % 2 != 0 {
            height += 1;
        }
        (max_len, height)
    } else {
        let mut width = (max_len as f64 * aspect) as u32;
        if width % 2 != 0 {
            width += 1;
        }
        (width, max_len)
    };
    (w.max(1), h.max(1))
}

/// Round both edges up to multiples of `tile`, keeping the aspect ratio of
/// the longer one
fn tile_aligned_size((w, h): (u32, u32), tile: u32) -> (u32, u32) {
    let aspect = w as f64 / h as f64;
    if w >= h {
        let width = w.div_ceil(tile) * tile;
        let height = ((width as f64 / aspect) as u32).div_ceil(tile).max(1) * tile;
        (width, height)
    } else {
        let height = h.div_ceil(tile) * tile;
        let width = ((height as f64 * aspect) as u32).div_ceil(tile).max(1) * tile;
        (width, height)
    }
}

fn write_frame(
    pixel_values: &mut Array5<f32>,
    pixel_attention_mask: &mut Array4<bool>,
    frame: usize,
    image: &DynamicImage,
    size: u32,
    mode: ResizeMode,
    config: &ImageProcessorConfig,
) {
    let (content_w, content_h) = fitted_size(image.dimensions(), size, mode);
    if content_w == 0 || content_h == 0 {
        return;
    }
    let offset_x = (size - content_w) / 2;
    let offset_y = (size - content_h) / 2;

    let rgb = if image.dimensions() == (content_w, content_h) {
        image.to_rgb8()
    } else {
        image
            .resize_exact(content_w, content_h, FilterType::Lanczos3)
            .to_rgb8()
    };

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let tx = (x + offset_x) as usize;
        let ty = (y + offset_y) as usize;
        for c in 0..3 {
            pixel_values[[0, frame, c, ty, tx]] = normalize(pixel[c], c, config);
        }
        pixel_attention_mask[[0, frame, ty, tx]] = true;
    }
}

fn normalize(value: u8, channel: usize, config: &ImageProcessorConfig) -> f32 {
    let mut v = value as f32;
    if config.do_rescale {
        v *= config.rescale_factor;
    }
    if config.do_normalize {
        v = (v - config.image_mean[channel]) / config.image_std[channel];
    }
    v
}

/// Size of the image content inside the `target × target` input
fn fitted_size((orig_w, orig_h): (u32, u32), target: u32, mode: ResizeMode) -> (u32, u32) {
    if orig_w == 0 || orig_h == 0 {
        return (0, 0);
    }
    match mode {
        ResizeMode::Stretch => (target, target),
        ResizeMode::Letterbox => {
            let scale = (target as f32 / orig_w as f32).min(target as f32 / orig_h as f32);
            let w = ((orig_w as f32 * scale).round() as u32).clamp(1, target);
            let h = ((orig_h as f32 * scale).round() as u32).clamp(1, target);
            (w, h)
        }
    }
}
