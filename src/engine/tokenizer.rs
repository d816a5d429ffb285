use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use crate::error::{Error, Result};
use crate::model_catalog::{ModelEntry, ModelFamily};

/// Search order: explicit entry hint, then next to the weights, then the
/// working directory, then the shared models directory.
pub(super) fn resolve_tokenizer_path(entry: &ModelEntry) -> Option<PathBuf> {
    if let Some(hint) = &entry.tokenizer_path {
        if hint.exists() {
            return Some(hint.clone());
        }
    }

    let parent = entry.path.parent().unwrap_or(Path::new("."));
    let sibling = parent.join("tokenizer.json");
    if sibling.exists() {
        return Some(sibling);
    }

    let cwd = Path::new("tokenizer.json");
    if cwd.exists() {
        return Some(cwd.to_path_buf());
    }

    let shared = Path::new("models").join("tokenizer.json");
    if shared.exists() {
        return Some(shared);
    }

    None
}

pub(super) fn fetch_from_hub(repo: &str, filename: &str) -> Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| Error::ModelLoad(format!("hub api init failed: {}", e)))?;
    api.model(repo.to_string()).get(filename).map_err(|e| {
        Error::ModelLoad(format!(
            "hub fetch of '{}' from '{}' failed: {}",
            filename, repo, e
        ))
    })
}

/// The eos token doubles as the pad token, so one id covers both roles.
pub(super) fn resolve_eos_token(tokenizer: &Tokenizer, family: ModelFamily) -> Result<u32> {
    let candidates: &[&str] = match family {
        ModelFamily::DeepSeek => &["<｜end▁of▁sentence｜>", "<|im_end|>", "<|endoftext|>"],
        ModelFamily::Qwen2 | ModelFamily::Qwen3 => &["<|im_end|>", "<|endoftext|>"],
    };

    candidates
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .ok_or_else(|| {
            Error::ModelLoad(format!(
                "tokenizer/model incompatibility: none of {:?} present for {:?}",
                candidates, family
            ))
        })
}
