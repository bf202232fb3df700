//! Configuration: a TOML file validated against a generated JSON schema,
//! deserialized into one explicit struct that gets passed into each stage.
//! Secrets and a few operational knobs come from the environment instead of
//! the file.

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use piiwatch_store::StorePaths;

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the pending/verified/marker stores. Default `data`.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// Pages to fetch and scan.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Local text files to scan (fixture sites, OCR sidecar dumps).
    #[serde(default)]
    pub files: Vec<String>,
    /// Group stamped on every candidate from these sources.
    #[serde(default)]
    pub group: Option<String>,
    /// Politeness delay between page fetches, milliseconds.
    #[serde(default)]
    pub fetch_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Entity-recognition runtime base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Input cap per extraction call; longer texts are chunked and merged.
    #[serde(default)]
    pub max_chunk_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    /// Judgment oracle base URL (chat-completions compatible).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model name sent with each judgment request.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable carrying the bearer key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Delay between oracle calls, milliseconds.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    /// Fine-tune runtime base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Checkpoint directory the runtime reads and overwrites.
    /// Default `<data_dir>/ner-model`.
    #[serde(default)]
    pub checkpoint_dir: Option<String>,
    /// Base model used when no checkpoint exists yet.
    #[serde(default)]
    pub base_model: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Timeout for collaborator calls, seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {path}: {e}"))?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(&content)?;
    Ok(cfg)
}

/// Read a positive integer override from the environment.
fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|v| *v > 0)
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(self.data_dir.as_deref().unwrap_or("data"))
    }

    pub fn store_paths(&self) -> StorePaths {
        StorePaths::under(&self.data_dir())
    }

    /// Collaborator HTTP timeout; `PIIWATCH_HTTP_TIMEOUT_SECS` wins over the
    /// file, default 20s, never below 1s.
    pub fn http_timeout(&self) -> std::time::Duration {
        let secs = env_u64("PIIWATCH_HTTP_TIMEOUT_SECS")
            .or(self.http.timeout_secs)
            .unwrap_or(20);
        std::time::Duration::from_secs(secs.max(1))
    }

    pub fn oracle_delay(&self) -> std::time::Duration {
        let ms = env_u64("PIIWATCH_ORACLE_DELAY_MS")
            .or(self.oracle.delay_ms)
            .unwrap_or(1000);
        std::time::Duration::from_millis(ms)
    }

    pub fn fetch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sources.fetch_delay_ms.unwrap_or(1000))
    }

    pub fn checkpoint_dir(&self) -> String {
        self.trainer
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("ner-model").display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(toml_body: &str) -> Result<Config> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_body.as_bytes()).unwrap();
        load_config(file.path().to_str().unwrap())
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_str("").unwrap();
        assert_eq!(cfg.data_dir(), PathBuf::from("data"));
        assert_eq!(cfg.http_timeout(), std::time::Duration::from_secs(20));
        assert_eq!(cfg.oracle_delay(), std::time::Duration::from_millis(1000));
        assert!(cfg.checkpoint_dir().ends_with("ner-model"));
    }

    #[test]
    fn full_config_parses() {
        let cfg = load_str(
            r#"
data_dir = "/tmp/piiwatch"

[sources]
urls = ["https://example.com/"]
files = ["site/index.txt"]
group = "web-crawl"
fetch_delay_ms = 250

[model]
base_url = "http://127.0.0.1:8089"
max_chunk_bytes = 4000

[oracle]
base_url = "http://127.0.0.1:8090"
model = "judge-1"
api_key_env = "PIIWATCH_ORACLE_API_KEY"
delay_ms = 0

[trainer]
base_url = "http://127.0.0.1:8091"
base_model = "roberta-base"

[http]
timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.sources.urls.len(), 1);
        assert_eq!(cfg.oracle_delay(), std::time::Duration::ZERO);
        assert_eq!(cfg.http_timeout(), std::time::Duration::from_secs(5));
        assert_eq!(cfg.checkpoint_dir(), "/tmp/piiwatch/ner-model");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(load_str("unknown_knob = true").is_err());
        assert!(load_str("[oracle]\nmispelled_url = \"x\"").is_err());
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(load_str("[sources]\nurls = \"not-a-list\"").is_err());
    }
}
