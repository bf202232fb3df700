//! Chat-completions client for the judgment oracle.
//!
//! The oracle sees the candidate's context and content and answers with a
//! LEAK or PUBLIC verdict plus a one-line reason, as a JSON object.
//! Anything else (timeouts, non-2xx, prose instead of JSON, an unknown
//! label) is a typed error the verification stage turns into an ERROR row.

use async_trait::async_trait;
use piiwatch_protocol::Label;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const SYSTEM_PROMPT: &str = "\
You are a senior privacy and security reviewer. You receive detections made \
by a first-pass scanner that is regex-based and produces frequent false \
positives. Critically review the context and decide whether the detection is \
a real LEAK or PUBLIC information.

Classify as LEAK: passwords, API keys, national id numbers, passport or card \
numbers, personal (non-official) email addresses or phone numbers, and \
internal details exposed by mistake such as internal IPs or employee names.

Classify as PUBLIC: service-desk emails and representative phone numbers in \
page footers, official addresses, obvious sample or test data such as \
test@example.com or 010-0000-0000, and plain number sequences that are not \
PII at all.

Answer with exactly one JSON object and nothing else: \
{\"label\": \"LEAK\" or \"PUBLIC\", \"reason\": \"one line\"}";

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("judgment request timed out")]
    Timeout,
    #[error("judgment endpoint returned http {status}")]
    Http { status: u16 },
    #[error("judgment transport error: {0}")]
    Transport(String),
    #[error("malformed judgment response: {0}")]
    Malformed(String),
}

/// A successful verdict. `label` is always `Leak` or `Public` here; `Error`
/// rows are minted by the stage from an [`OracleError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub label: Label,
    pub reason: String,
}

/// The judgment collaborator as seen by the verification stage.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, context: &str, content: &str) -> Result<Judgment, OracleError>;
}

#[derive(Debug, Clone)]
pub struct LlmJudgeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

pub struct LlmJudge {
    client: reqwest::Client,
    cfg: LlmJudgeConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct Verdict {
    label: String,
    #[serde(default)]
    reason: String,
}

impl LlmJudge {
    pub fn new(client: reqwest::Client, cfg: LlmJudgeConfig) -> Self {
        let cfg = LlmJudgeConfig {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            ..cfg
        };
        Self { client, cfg }
    }
}

fn classify_reqwest(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Transport(err.to_string())
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, context: &str, content: &str) -> Result<Judgment, OracleError> {
        let url = format!("{}/v1/chat/completions", self.cfg.base_url);
        let body = json!({
            "model": self.cfg.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!("[context]: \"...{context}...\"\n[detected]: \"{content}\"")},
            ],
            "response_format": {"type": "json_object"},
            "max_tokens": self.cfg.max_tokens,
            "temperature": 0.1,
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Http {
                status: status.as_u16(),
            });
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        let answer = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| OracleError::Malformed("empty choices".into()))?;
        let verdict: Verdict = serde_json::from_str(answer)
            .map_err(|e| OracleError::Malformed(format!("not a verdict object: {e}")))?;
        let label = match verdict.label.to_ascii_uppercase().as_str() {
            "LEAK" => Label::Leak,
            "PUBLIC" => Label::Public,
            other => {
                return Err(OracleError::Malformed(format!("unknown label {other:?}")));
            }
        };
        debug!(%content, label = ?label, "oracle verdict");
        Ok(Judgment {
            label,
            reason: verdict.reason,
        })
    }
}
