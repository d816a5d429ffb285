use std::path::Path;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_qwen2;
use candle_transformers::models::quantized_qwen3;

use crate::error::{Error, Result};
use crate::model_catalog::ModelFamily;

/// Loaded weights behind a single forward interface, so the rest of the
/// pipeline stays architecture-agnostic.
pub enum RuntimeModel {
    Qwen2(quantized_qwen2::ModelWeights),
    Qwen3(quantized_qwen3::ModelWeights),
    #[cfg(test)]
    Stub(StubModel),
}

/// Scripted stand-in for real weights: each forward pass puts all the mass
/// on the next scripted token, so pipeline tests run without weight files.
#[cfg(test)]
pub(crate) struct StubModel {
    script: Vec<u32>,
    step: usize,
    vocab_size: usize,
}

#[cfg(test)]
impl StubModel {
    pub(crate) fn scripted(script: Vec<u32>, vocab_size: usize) -> Self {
        Self {
            script,
            step: 0,
            vocab_size,
        }
    }

    fn next_logits(&mut self, device: &Device) -> candle_core::Result<Tensor> {
        let favored = self.script.get(self.step).copied().unwrap_or(0);
        self.step += 1;

        let mut logits = vec![0f32; self.vocab_size];
        logits[favored as usize] = 100.0;
        Tensor::new(logits, device)?.unsqueeze(0)
    }
}

impl RuntimeModel {
    pub fn load_from_gguf(path: &Path, family: ModelFamily, device: &Device) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            Error::ModelLoad(format!("failed to open '{}': {}", path.display(), e))
        })?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| {
            Error::ModelLoad(format!("invalid gguf '{}': {}", path.display(), e))
        })?;

        match family {
            // R1 distills ship qwen2-architecture weights.
            ModelFamily::DeepSeek | ModelFamily::Qwen2 => {
                match quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device) {
                    Ok(model) => Ok(Self::Qwen2(model)),
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("cannot find tensor info for output_norm.weight") {
                            Err(Error::ModelLoad(format!(
                                "'{}' looks like an incomplete split shard (missing output_norm.weight); merge the parts into a single gguf",
                                path.display()
                            )))
                        } else {
                            Err(Error::ModelLoad(msg))
                        }
                    }
                }
            }
            ModelFamily::Qwen3 => {
                let model = quantized_qwen3::ModelWeights::from_gguf(content, &mut file, device)
                    .map_err(|e| Error::ModelLoad(e.to_string()))?;
                Ok(Self::Qwen3(model))
            }
        }
    }

    pub fn forward(&mut self, input: &Tensor, position: usize) -> candle_core::Result<Tensor> {
        match self {
            Self::Qwen2(model) => model.forward(input, position),
            Self::Qwen3(model) => model.forward(input, position),
            #[cfg(test)]
            Self::Stub(model) => model.next_logits(input.device()),
        }
    }
}
