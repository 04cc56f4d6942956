// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Output cleaning

use regex::Regex;
use std::sync::OnceLock;

fn role_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^(?:Assistant|A):\s*").expect("valid role marker regex"))
}

/// Strip prompt echo and the assistant role marker from decoded output
///
/// Steps, in order:
/// 1. remove the first occurrence of the rendered prompt text
/// 2. drop a leading `Assistant:` or `A:` marker
/// 3. drop a leading copy of the instruction, if the model echoed it
/// 4. repeat 2 and 3 until neither matches, then trim surrounding whitespace
///
/// Text that never contained the prompt is only trimmed and de-marked, so
/// applying this to already-clean text is a no-op.
pub fn clean_output(full_text: &str, prompt_text: &str, instruction: &str) -> String {
    let mut text = if !prompt_text.is_empty() {
        full_text.replacen(prompt_text, "", 1)
    } else {
        full_text.to_string()
    };

    let instruction = instruction.trim();
    loop {
        let stripped = {
            let unmarked = role_marker().replace(text.trim_start(), "");
            match unmarked.strip_prefix(instruction) {
                Some(rest) if !instruction.is_empty() => rest.to_string(),
                _ => unmarked.into_owned(),
            }
        };
        if stripped.len() == text.len() {
            break;
        }
        text = stripped;
    }

    text.trim().to_string()
}
