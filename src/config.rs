use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Gateway settings loaded from `gateway.toml`. Every field has a default so
/// a missing file yields a runnable configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_model_name")]
    pub default_model: String,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

/// One `[models.<name>]` table entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Explicit family label; inferred from the name when omitted.
    #[serde(default)]
    pub family: Option<String>,
    /// Explicit tokenizer.json location; resolved next to the weights when
    /// omitted.
    #[serde(default)]
    pub tokenizer: Option<PathBuf>,
    /// Hub repo used to fetch tokenizer files that are missing locally.
    #[serde(default)]
    pub hub_repo: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_model_name() -> String {
    "deepseek".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "deepseek".to_string(),
            ModelConfig {
                path: PathBuf::from("./models/DeepSeek-R1-Distill-Qwen-7B-Q4_K_M.gguf"),
                family: None,
                tokenizer: None,
                hub_repo: Some("deepseek-ai/DeepSeek-R1-Distill-Qwen-7B".to_string()),
            },
        );
        models.insert(
            "qwen3".to_string(),
            ModelConfig {
                path: PathBuf::from("./models/Qwen3-8B-Q4_K_M.gguf"),
                family: None,
                tokenizer: None,
                hub_repo: Some("Qwen/Qwen3-8B".to_string()),
            },
        );

        Self {
            bind_addr: default_bind_addr(),
            default_model: default_model_name(),
            models,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("config read failed '{}'", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("config parse failed '{}'", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::GatewayConfig;

    #[test]
    fn built_in_defaults_cover_both_stock_models() {
        let config = GatewayConfig::default();

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.default_model, "deepseek");
        assert_eq!(config.models.len(), 2);

        let deepseek = config.models.get("deepseek").expect("deepseek entry");
        assert!(deepseek
            .path
            .to_string_lossy()
            .contains("DeepSeek-R1-Distill-Qwen-7B"));
        assert_eq!(
            deepseek.hub_repo.as_deref(),
            Some("deepseek-ai/DeepSeek-R1-Distill-Qwen-7B")
        );

        let qwen3 = config.models.get("qwen3").expect("qwen3 entry");
        assert!(qwen3.path.to_string_lossy().contains("Qwen3-8B"));
    }

    #[test]
    fn partial_file_falls_back_to_field_defaults() {
        let dir = mk_temp_dir("sconce_config_partial");
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("gateway.toml");
        fs::write(
            &path,
            r#"
default_model = "qwen3"

[models.qwen3]
path = "/srv/weights/Qwen3-8B-Q4_K_M.gguf"
"#,
        )
        .expect("write config");

        let config = GatewayConfig::load(&path).expect("config loads");
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.default_model, "qwen3");
        assert_eq!(config.models.len(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn full_entry_parses_all_optional_fields() {
        let dir = mk_temp_dir("sconce_config_full");
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("gateway.toml");
        fs::write(
            &path,
            r#"
bind_addr = "127.0.0.1:9100"

[models.lab]
path = "/srv/weights/lab.gguf"
family = "qwen2"
tokenizer = "/srv/weights/tokenizer.json"
hub_repo = "org/lab-model"
"#,
        )
        .expect("write config");

        let config = GatewayConfig::load(&path).expect("config loads");
        assert_eq!(config.bind_addr, "127.0.0.1:9100");

        let lab = config.models.get("lab").expect("lab entry");
        assert_eq!(lab.family.as_deref(), Some("qwen2"));
        assert_eq!(lab.tokenizer.as_deref(), Some(std::path::Path::new("/srv/weights/tokenizer.json")));
        assert_eq!(lab.hub_repo.as_deref(), Some("org/lab-model"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = mk_temp_dir("sconce_config_bad");
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("gateway.toml");
        fs::write(&path, "bind_addr = [not toml").expect("write config");

        let err = GatewayConfig::load(&path).expect_err("parse must fail");
        assert!(err.to_string().contains("config parse failed"));

        let _ = fs::remove_dir_all(dir);
    }

    fn mk_temp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time ok")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), ts))
    }
}
