// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Deterministic autoregressive decoding
//!
//! The loop is model-independent: anything implementing [`LogitsStep`] can be
//! decoded. Selection is greedy with an HF-style repetition penalty, output is
//! capped at `max_new_tokens` and stop tokens are never emitted.

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::OcrError;

/// One forward pass of a causal model
pub trait LogitsStep {
    /// Feed `new_tokens` (the whole prompt on the first call, then one token
    /// at a time) and return next-token logits for the last position.
    fn forward(&mut self, new_tokens: &[u32]) -> Result<Vec<f32>, OcrError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A stop token was selected
    Stop,
    /// `max_new_tokens` reached
    Length,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    /// Newly generated token ids, prompt and stop token excluded
    pub tokens: Vec<u32>,
    pub finish_reason: FinishReason,
}

/// Run greedy decoding until a stop token or the token cap
///
/// # Errors
/// - `Generation` if the prompt is empty or the model fails
/// - `Cancelled` if `cancel` fires between steps
pub fn greedy_decode<S: LogitsStep + ?Sized>(
    model: &mut S,
    prompt: &[u32],
    config: &GenerationConfig,
    stop_token_ids: &[u32],
    cancel: &CancellationToken,
) -> Result<GenerationOutput, OcrError> {
    if prompt.is_empty() {
        return Err(OcrError::Generation("prompt has no tokens".into()));
    }

    let mut seen: HashSet<u32> = prompt.iter().copied().collect();
    let mut tokens = Vec::new();
    let mut pending: Vec<u32> = prompt.to_vec();
    let mut finish_reason = FinishReason::Length;

    while tokens.len() < config.max_new_tokens {
        if cancel.is_cancelled() {
            return Err(OcrError::Cancelled(format!(
                "generation cancelled after {} tokens",
                tokens.len()
            )));
        }

        let mut logits = model.forward(&pending)?;
        apply_repetition_penalty(&mut logits, &seen, config.repetition_penalty);
        let next = argmax(&logits)?;

        if stop_token_ids.contains(&next) {
            finish_reason = FinishReason::Stop;
            break;
        }

        tokens.push(next);
        seen.insert(next);
        pending.clear();
        pending.push(next);
    }

    debug!(
        generated = tokens.len(),
        ?finish_reason,
        "Decoding finished"
    );

    Ok(GenerationOutput {
        tokens,
        finish_reason,
    })
}

/// Penalize every token already present in the sequence
///
/// Positive logits are divided by `penalty`, negative ones multiplied, so a
/// penalty above 1.0 always makes a repeated token less likely.
pub fn apply_repetition_penalty(logits: &mut [f32], seen: &HashSet<u32>, penalty: f32) {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return;
    }
    for &token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = if *logit > 0.0 {
                *logit / penalty
            } else {
                *logit * penalty
            };
        }
    }
}

/// Index of the largest logit; ties resolve to the lowest index, NaN never wins
pub fn argmax(logits: &[f32]) -> Result<u32, OcrError> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in logits.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx as u32)
        .ok_or_else(|| OcrError::Generation("model returned no usable logits".into()))
}
