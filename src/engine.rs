mod generation;
mod lifecycle;
mod tokenizer;

use candle_core::Device;
use tokenizers::Tokenizer;

use crate::backend::RuntimeModel;
use crate::error::{Error, Result};
use crate::model_catalog::ModelCatalog;
use crate::prompting::ChatTemplate;
use crate::protocol::{ChatMessage, FinishReason};

pub use generation::fresh_seed;

/// Everything a resident model needs to serve requests. Weights, tokenizer
/// and template live and die together, so a half-initialized model can never
/// be observed.
pub struct LLMEngine {
    name: String,
    model: RuntimeModel,
    tokenizer: Tokenizer,
    template: Option<ChatTemplate>,
    eos_token_id: u32,
    device: Device,
}

/// The single owner of whatever model is currently resident. All lifecycle
/// changes and generations flow through one of these behind a mutex.
pub struct ModelSession {
    catalog: ModelCatalog,
    device: Device,
    engine: Option<LLMEngine>,
    #[cfg(test)]
    loader: Option<EngineLoader>,
}

/// Test seam: stands in for `LLMEngine::load` so the switch path runs
/// without weight files on disk.
#[cfg(test)]
pub(crate) type EngineLoader =
    Box<dyn Fn(&crate::model_catalog::ModelEntry, &Device) -> Result<LLMEngine> + Send>;

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub answer: String,
    pub finish_reason: FinishReason,
}

impl LLMEngine {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compiles conversation turns into the model-ready prompt string using
    /// the model's own chat template.
    pub fn compile_prompt(&self, turns: &[ChatMessage], system_prompt: &str) -> Result<String> {
        let template = self.template.as_ref().ok_or_else(|| {
            Error::Template(format!("model '{}' ships no chat template", self.name))
        })?;
        let turns = crate::prompting::assemble_turns(turns, system_prompt);
        template.render(&turns)
    }
}

#[cfg(test)]
impl LLMEngine {
    /// Fully wired engine over a scripted model and a toy tokenizer, so
    /// pipeline tests run without weight files.
    pub(crate) fn stubbed(
        name: &str,
        vocab: &[(&str, u32)],
        special_tokens: &[&str],
        script: &[u32],
        eos_token_id: u32,
        template: Option<&str>,
    ) -> Self {
        use std::collections::HashMap;

        use tokenizers::models::wordlevel::WordLevel;
        use tokenizers::AddedToken;

        use crate::backend::StubModel;

        let vocab_map: HashMap<String, u32> = vocab
            .iter()
            .map(|(token, id)| (token.to_string(), *id))
            .collect();
        let word_level = WordLevel::builder()
            .vocab(vocab_map.into_iter().collect())
            .unk_token("<unk>".to_string())
            .build()
            .expect("wordlevel builds");
        let mut tokenizer = Tokenizer::new(word_level);
        for token in special_tokens {
            tokenizer.add_special_tokens(&[AddedToken::from(*token, true)]);
        }

        let vocab_size = vocab
            .iter()
            .map(|(_, id)| *id)
            .chain(script.iter().copied())
            .chain(std::iter::once(eos_token_id))
            .max()
            .unwrap_or(0) as usize
            + 1;

        Self {
            name: name.to_string(),
            model: RuntimeModel::Stub(StubModel::scripted(script.to_vec(), vocab_size)),
            tokenizer,
            template: template.map(ChatTemplate::from_source),
            eos_token_id,
            device: Device::Cpu,
        }
    }
}

#[cfg(test)]
impl ModelSession {
    /// Session with `engine` already resident, bypassing the load path.
    pub(crate) fn with_engine(catalog: ModelCatalog, engine: LLMEngine) -> Self {
        Self {
            catalog,
            device: Device::Cpu,
            engine: Some(engine),
            loader: None,
        }
    }

    /// Empty session whose loads run through `loader` instead of the real
    /// weight loader, so successful loads and switches are testable.
    pub(crate) fn with_loader(catalog: ModelCatalog, loader: EngineLoader) -> Self {
        Self {
            catalog,
            device: Device::Cpu,
            engine: None,
            loader: Some(loader),
        }
    }
}
