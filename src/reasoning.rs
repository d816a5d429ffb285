use tokenizers::Tokenizer;

use crate::error::{Error, Result};

/// Token id reasoning models emit when the hidden deliberation ends.
pub const REASONING_END_TOKEN_ID: u32 = 151668;

/// Textual form of the same boundary inside decoded output.
pub const REASONING_CLOSE_TAG: &str = "</think>";

/// Index of the first token after the last reasoning terminator, 0 when the
/// terminator never occurs. The terminator itself is excluded.
pub fn reasoning_boundary(output_ids: &[u32]) -> usize {
    output_ids
        .iter()
        .rposition(|&id| id == REASONING_END_TOKEN_ID)
        .map_or(0, |pos| pos + 1)
}

/// Answer segment after the first close tag. With repeated tags the captured
/// segment ends at the second tag, matching the historical behavior clients
/// were built against. A missing tag is a hard error, never an empty answer.
pub fn split_answer(decoded: &str) -> Result<String> {
    decoded
        .split(REASONING_CLOSE_TAG)
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::MalformedOutput(format!(
                "no '{}' delimiter in generated output",
                REASONING_CLOSE_TAG
            ))
        })
}

/// Full extraction: token-level boundary scan, decode of the tail with
/// special tokens skipped, trailing-newline trim, textual split.
pub fn extract_answer(tokenizer: &Tokenizer, output_ids: &[u32]) -> Result<String> {
    let boundary = reasoning_boundary(output_ids);
    let decoded = tokenizer
        .decode(&output_ids[boundary..], true)
        .map_err(|e| Error::Generation(format!("output decode failed: {}", e)))?;
    split_answer(decoded.trim_end_matches('\n'))
}
