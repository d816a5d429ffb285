use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Architecture family of a catalog entry. Consumed only by the runtime
/// adapter (weight layout) and special-token resolution; the request
/// pipeline itself never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    DeepSeek,
    Qwen2,
    Qwen3,
}

impl ModelFamily {
    fn parse(label: &str) -> Option<Self> {
        match label.to_lowercase().as_str() {
            "deepseek" | "deepseek-r1" => Some(Self::DeepSeek),
            "qwen3" => Some(Self::Qwen3),
            "qwen2" | "qwen" => Some(Self::Qwen2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    pub family: ModelFamily,
    pub tokenizer_path: Option<PathBuf>,
    pub hub_repo: Option<String>,
}

/// Static mapping from logical model name to storage location, built once at
/// startup. Lookups never touch the filesystem.
#[derive(Debug)]
pub struct ModelCatalog {
    entries: BTreeMap<String, ModelEntry>,
}

impl ModelCatalog {
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();

        for (name, model) in &config.models {
            let family = match model.family.as_deref() {
                Some(label) => ModelFamily::parse(label)
                    .with_context(|| format!("model '{}': unknown family '{}'", name, label))?,
                None => infer_family(name, &model.path).with_context(|| {
                    format!(
                        "model '{}': family not given and not inferable from '{}'",
                        name,
                        model.path.display()
                    )
                })?,
            };

            entries.insert(
                name.clone(),
                ModelEntry {
                    name: name.clone(),
                    path: model.path.clone(),
                    family,
                    tokenizer_path: model.tokenizer.clone(),
                    hub_repo: model.hub_repo.clone(),
                },
            );
        }

        if entries.is_empty() {
            bail!("model catalog is empty: configure at least one [models.<name>] entry");
        }

        Ok(Self { entries })
    }

    pub fn resolve(&self, name: &str) -> Result<&ModelEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn infer_family(name: &str, path: &Path) -> Option<ModelFamily> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let haystack = format!("{} {}", name, stem).to_lowercase();

    // R1 distills mention qwen in the filename, so deepseek wins first.
    if haystack.contains("deepseek") || haystack.contains("r1-distill") {
        Some(ModelFamily::DeepSeek)
    } else if haystack.contains("qwen3") {
        Some(ModelFamily::Qwen3)
    } else if haystack.contains("qwen") {
        Some(ModelFamily::Qwen2)
    } else {
        None
    }
}
