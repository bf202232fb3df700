//! Client for the incremental fine-tune runtime.
//!
//! The runtime owns checkpoint storage: it loads the current checkpoint
//! (falling back to the base model when none exists), applies the update,
//! and overwrites the checkpoint. The stage only ships the tagged batch and
//! the checkpoint coordinates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::align::{Tag, TaggedSequence};

#[derive(Debug, thiserror::Error)]
pub enum TunerError {
    #[error("fine-tune request timed out")]
    Timeout,
    #[error("fine-tune runtime returned http {status}")]
    Http { status: u16 },
    #[error("fine-tune transport error: {0}")]
    Transport(String),
    #[error("malformed fine-tune response: {0}")]
    Malformed(String),
}

/// One training sample on the wire: parallel token and tag sequences.
#[derive(Debug, Clone, Serialize)]
pub struct TrainSample {
    pub tokens: Vec<String>,
    pub tags: Vec<Tag>,
}

impl From<&TaggedSequence> for TrainSample {
    fn from(seq: &TaggedSequence) -> Self {
        Self {
            tokens: seq.tokens.iter().map(|t| t.text.clone()).collect(),
            tags: seq.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TuneReport {
    pub trained_samples: usize,
    pub checkpoint: String,
}

/// The fine-tune collaborator as seen by the training stage.
#[async_trait]
pub trait Tuner: Send + Sync {
    async fn fine_tune(&self, samples: &[TrainSample]) -> Result<TuneReport, TunerError>;
}

#[derive(Debug, Clone)]
pub struct HttpTunerConfig {
    pub base_url: String,
    pub checkpoint_dir: String,
    pub base_model: String,
}

pub struct HttpTuner {
    client: reqwest::Client,
    cfg: HttpTunerConfig,
}

#[derive(Serialize)]
struct TuneRequest<'a> {
    base_model: &'a str,
    checkpoint_dir: &'a str,
    samples: &'a [TrainSample],
}

impl HttpTuner {
    pub fn new(client: reqwest::Client, cfg: HttpTunerConfig) -> Self {
        let cfg = HttpTunerConfig {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            ..cfg
        };
        Self { client, cfg }
    }
}

#[async_trait]
impl Tuner for HttpTuner {
    async fn fine_tune(&self, samples: &[TrainSample]) -> Result<TuneReport, TunerError> {
        let url = format!("{}/v1/fine-tune", self.cfg.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TuneRequest {
                base_model: &self.cfg.base_model,
                checkpoint_dir: &self.cfg.checkpoint_dir,
                samples,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TunerError::Timeout
                } else {
                    TunerError::Transport(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TunerError::Http {
                status: status.as_u16(),
            });
        }
        resp.json()
            .await
            .map_err(|e| TunerError::Malformed(e.to_string()))
    }
}
