use std::path::Path;

use candle_core::Device;
use tokenizers::Tokenizer;
use tracing::{error, info, warn};

use crate::backend::RuntimeModel;
use crate::error::{Error, Result};
use crate::model_catalog::{ModelCatalog, ModelEntry};
use crate::prompting::{ChatTemplate, GenerationConfig};
use crate::protocol::{ChatMessage, FinishReason};
use crate::reasoning::extract_answer;

use super::tokenizer::{fetch_from_hub, resolve_eos_token, resolve_tokenizer_path};
use super::{CompletionResult, LLMEngine, ModelSession};

impl LLMEngine {
    /// Loads weights, tokenizer, special tokens and chat template for one
    /// catalog entry. Returns only once all of them are usable; any failure
    /// leaves nothing behind.
    pub fn load(entry: &ModelEntry, device: &Device) -> Result<Self> {
        info!(model = %entry.name, path = %entry.path.display(), "loading model weights");
        let model = RuntimeModel::load_from_gguf(&entry.path, entry.family, device)?;

        let tokenizer_path = match resolve_tokenizer_path(entry) {
            Some(path) => path,
            None => match &entry.hub_repo {
                Some(repo) => {
                    info!(model = %entry.name, repo = %repo, "no local tokenizer.json, fetching from hub");
                    fetch_from_hub(repo, "tokenizer.json")?
                }
                None => {
                    return Err(Error::ModelLoad(format!(
                        "no tokenizer.json found for model '{}' and no hub repo configured",
                        entry.name
                    )))
                }
            },
        };
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::ModelLoad(format!(
                "tokenizer load failed '{}': {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let eos_token_id = resolve_eos_token(&tokenizer, entry.family)?;

        let template = load_chat_template(entry, &tokenizer_path)?;
        if template.is_none() {
            warn!(model = %entry.name, "model ships no chat template, chat requests will be refused");
        }

        info!(model = %entry.name, eos_token_id, "model ready");

        Ok(Self {
            name: entry.name.clone(),
            model,
            tokenizer,
            template,
            eos_token_id,
            device: device.clone(),
        })
    }
}

/// The template rides in `tokenizer_config.json`. Look next to the resolved
/// tokenizer first, then next to the weights, then on the hub. A failed hub
/// fetch degrades to no template because the absence only matters once a
/// chat request actually needs it.
fn load_chat_template(entry: &ModelEntry, tokenizer_path: &Path) -> Result<Option<ChatTemplate>> {
    if let Some(dir) = tokenizer_path.parent() {
        if let Some(template) = ChatTemplate::from_tokenizer_config(&dir.join("tokenizer_config.json"))? {
            return Ok(Some(template));
        }
    }

    if let Some(dir) = entry.path.parent() {
        if let Some(template) = ChatTemplate::from_tokenizer_config(&dir.join("tokenizer_config.json"))? {
            return Ok(Some(template));
        }
    }

    if let Some(repo) = &entry.hub_repo {
        match fetch_from_hub(repo, "tokenizer_config.json") {
            Ok(path) => return ChatTemplate::from_tokenizer_config(&path),
            Err(e) => {
                warn!(model = %entry.name, error = %e, "hub fetch of tokenizer_config.json failed");
            }
        }
    }

    Ok(None)
}

impl ModelSession {
    pub fn new(catalog: ModelCatalog, device: Device) -> Self {
        Self {
            catalog,
            device,
            engine: None,
            #[cfg(test)]
            loader: None,
        }
    }

    fn load_engine(&self, entry: &ModelEntry) -> Result<LLMEngine> {
        #[cfg(test)]
        if let Some(loader) = &self.loader {
            return loader(entry, &self.device);
        }
        LLMEngine::load(entry, &self.device)
    }

    /// Name of the resident model, if any.
    pub fn current_name(&self) -> Option<&str> {
        self.engine.as_ref().map(|engine| engine.name())
    }

    /// Makes `name` the resident model. A no-op when it already is. The
    /// previous model is dropped before the replacement loads, so peak
    /// memory stays at one model; the cost is that a failed load leaves the
    /// session empty until the next request retries from scratch.
    pub fn ensure_ready(&mut self, name: &str) -> Result<()> {
        if self.current_name() == Some(name) {
            return Ok(());
        }

        let entry = self.catalog.resolve(name)?.clone();

        if let Some(previous) = self.engine.take() {
            info!(from = %previous.name(), to = %name, "switching resident model");
            drop(previous);
        }

        match self.load_engine(&entry) {
            Ok(engine) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                error!(model = %name, error = %e, "model load failed, session left empty");
                Err(e)
            }
        }
    }

    /// Full request pipeline against the resident model: compile the prompt,
    /// drive generation, extract the answer from the raw tokens.
    pub fn generate_reply(
        &mut self,
        turns: &[ChatMessage],
        system_prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| Error::Generation("no model is loaded".to_string()))?;

        let prompt = engine.compile_prompt(turns, system_prompt)?;
        let output_ids = engine.generate(&prompt, config)?;
        let answer = extract_answer(&engine.tokenizer, &output_ids)?;

        Ok(CompletionResult {
            answer,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use candle_core::Device;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::error::Error;
    use crate::model_catalog::ModelCatalog;
    use crate::protocol::ChatMessage;

    /// Stock catalog pointing at weight paths that do not exist here, which
    /// is exactly what the load-failure tests need.
    fn empty_session() -> ModelSession {
        let catalog =
            ModelCatalog::from_config(&GatewayConfig::default()).expect("stock catalog builds");
        ModelSession::new(catalog, Device::Cpu)
    }

    /// Fully wired scripted engine that can run the whole pipeline: the
    /// compiled prompt is one vocab entry, the script emits a tagged answer
    /// and then eos.
    fn scripted_engine(name: &str) -> LLMEngine {
        const PROMPT: &str = "<|user|>hi<|assistant|>";
        const TEMPLATE: &str = "{% for message in messages %}<|{{ message.role }}|>{{ message.content }}{% endfor %}<|assistant|>";

        LLMEngine::stubbed(
            name,
            &[
                (PROMPT, 0),
                ("<|im_end|>", 1),
                ("</think>All set.", 2),
                ("<unk>", 3),
            ],
            &["<|im_end|>"],
            &[2, 1],
            1,
            Some(TEMPLATE),
        )
    }

    /// Session with a scripted "deepseek" engine already resident, so the
    /// ready and generation paths run end to end without weight files.
    fn stub_session() -> ModelSession {
        let catalog =
            ModelCatalog::from_config(&GatewayConfig::default()).expect("stock catalog builds");
        ModelSession::with_engine(catalog, scripted_engine("deepseek"))
    }

    /// Empty session whose load path mints scripted engines instead of
    /// reading weights, counting how many loads actually run.
    fn loading_session(loads: Arc<AtomicUsize>) -> ModelSession {
        let catalog =
            ModelCatalog::from_config(&GatewayConfig::default()).expect("stock catalog builds");
        ModelSession::with_loader(
            catalog,
            Box::new(move |entry, _device| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(scripted_engine(&entry.name))
            }),
        )
    }

    #[test]
    fn unknown_model_fails_before_touching_the_session() {
        let mut session = empty_session();

        let err = session.ensure_ready("never-heard-of-it").expect_err("must fail");
        assert!(matches!(err, Error::UnknownModel(_)));
        assert_eq!(session.current_name(), None);
    }

    #[test]
    fn load_failure_leaves_no_resident_model() {
        let mut session = empty_session();

        let err = session.ensure_ready("deepseek").expect_err("weights are absent");
        assert!(matches!(err, Error::ModelLoad(_)));
        assert_eq!(session.current_name(), None);
    }

    #[test]
    fn failed_loads_are_retried_from_scratch() {
        let mut session = empty_session();

        // No failure caching: each call attempts the full load again.
        for _ in 0..2 {
            let err = session.ensure_ready("qwen3").expect_err("weights are absent");
            assert!(matches!(err, Error::ModelLoad(_)));
        }
        assert_eq!(session.current_name(), None);
    }

    #[test]
    fn generate_without_resident_model_is_a_generation_error() {
        let mut session = empty_session();
        let config = GenerationConfig {
            temperature: 0.7,
            top_p: 0.9,
            seed: 7,
            max_new_tokens: 16,
        };

        let err = session
            .generate_reply(&[ChatMessage::new("user", "hi")], "", &config)
            .expect_err("must fail");
        match err {
            Error::Generation(msg) => assert!(msg.contains("no model")),
            other => panic!("expected Generation error, got {other:?}"),
        }
    }

    #[test]
    fn successful_load_makes_the_requested_model_resident() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut session = loading_session(Arc::clone(&loads));

        session.ensure_ready("deepseek").expect("load succeeds");
        assert_eq!(session.current_name(), Some("deepseek"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_ensure_ready_loads_at_most_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut session = loading_session(Arc::clone(&loads));

        session.ensure_ready("qwen3").expect("load succeeds");
        session.ensure_ready("qwen3").expect("second call is a no-op");
        assert_eq!(session.current_name(), Some("qwen3"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn successful_switch_ends_with_the_new_model_resident() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut session = loading_session(Arc::clone(&loads));
        let config = GenerationConfig {
            temperature: 0.7,
            top_p: 0.9,
            seed: 11,
            max_new_tokens: 8,
        };

        session.ensure_ready("deepseek").expect("load succeeds");
        session.ensure_ready("qwen3").expect("switch succeeds");
        assert_eq!(session.current_name(), Some("qwen3"));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        // The freshly switched-in model serves requests end to end.
        let result = session
            .generate_reply(&[ChatMessage::new("user", "hi")], "", &config)
            .expect("pipeline completes on the new model");
        assert_eq!(result.answer, "All set.");
    }

    #[test]
    fn ensure_ready_short_circuits_for_the_resident_model() {
        let mut session = stub_session();

        // A real load would fail here (no weight files on disk), so success
        // means the resident engine was kept untouched.
        session.ensure_ready("deepseek").expect("already resident");
        assert_eq!(session.current_name(), Some("deepseek"));
    }

    #[test]
    fn switching_away_releases_the_resident_model_first() {
        let mut session = stub_session();

        let err = session.ensure_ready("qwen3").expect_err("weights are absent");
        assert!(matches!(err, Error::ModelLoad(_)));
        // The old engine is dropped before the replacement loads, so the
        // failed switch leaves nothing resident.
        assert_eq!(session.current_name(), None);
    }

    #[test]
    fn pipeline_failure_keeps_the_resident_model() {
        let engine = LLMEngine::stubbed(
            "deepseek",
            &[("<unk>", 0), ("<|im_end|>", 1)],
            &["<|im_end|>"],
            &[1],
            1,
            None,
        );
        let catalog =
            ModelCatalog::from_config(&GatewayConfig::default()).expect("stock catalog builds");
        let mut session = ModelSession::with_engine(catalog, engine);
        let config = GenerationConfig {
            temperature: 0.7,
            top_p: 0.9,
            seed: 7,
            max_new_tokens: 8,
        };

        let err = session
            .generate_reply(&[ChatMessage::new("user", "hi")], "", &config)
            .expect_err("template is absent");
        assert!(matches!(err, Error::Template(_)));
        // A failed request is not a model-health signal; nothing is unloaded.
        assert_eq!(session.current_name(), Some("deepseek"));
    }

    #[test]
    fn generate_reply_runs_the_full_pipeline() {
        let mut session = stub_session();
        let config = GenerationConfig {
            temperature: 0.7,
            top_p: 0.9,
            seed: 42,
            max_new_tokens: 8,
        };

        let result = session
            .generate_reply(&[ChatMessage::new("user", "hi")], "", &config)
            .expect("scripted pipeline completes");
        assert_eq!(result.answer, "All set.");
        assert!(matches!(result.finish_reason, FinishReason::Stop));
    }
}
