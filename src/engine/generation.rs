use candle_core::{DType, Tensor};
use candle_transformers::generation::LogitsProcessor;
use tracing::debug;

use crate::error::{Error, Result};
use crate::prompting::GenerationConfig;

use super::LLMEngine;

/// Entropy-backed seed so repeated identical requests still sample fresh
/// trajectories.
pub fn fresh_seed() -> Result<u64> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| Error::Generation(format!("sampling seed entropy unavailable: {}", e)))?;
    Ok(u64::from_le_bytes(bytes))
}

impl LLMEngine {
    /// Autoregressive sampling loop. The whole prompt goes through the first
    /// forward pass, then one token per step. Returns only the tokens
    /// generated after the prompt, in order, including the terminating eos
    /// when one was sampled. A failure here never unloads the model.
    pub fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| Error::Generation(format!("prompt encode failed: {}", e)))?;
        let mut tokens = encoding.get_ids().to_vec();
        let prompt_len = tokens.len();

        debug!(prompt_tokens = prompt_len, max_new_tokens = config.max_new_tokens, "starting generation");

        let mut logits_processor =
            LogitsProcessor::new(config.seed, Some(config.temperature), Some(config.top_p));
        let mut index_pos = 0;

        for _ in 0..config.max_new_tokens {
            let context_size = if index_pos == 0 { tokens.len() } else { 1 };
            let start_pos = tokens.len().saturating_sub(context_size);

            let input_tokens = &tokens[start_pos..];
            let input_len = input_tokens.len();

            let input = Tensor::new(input_tokens, &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| Error::Generation(format!("input tensor build failed: {}", e)))?;

            let logits = self
                .model
                .forward(&input, index_pos)
                .and_then(|l| l.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32))
                .map_err(|e| Error::Generation(format!("forward pass failed: {}", e)))?;

            let next_token = logits_processor
                .sample(&logits)
                .map_err(|e| Error::Generation(format!("token sampling failed: {}", e)))?;

            tokens.push(next_token);
            index_pos += input_len;

            if next_token == self.eos_token_id {
                break;
            }
        }

        debug!(generated_tokens = tokens.len() - prompt_len, "generation finished");

        // Exactly the suffix past the prompt, nothing of the echo.
        Ok(tokens.split_off(prompt_len))
    }
}
