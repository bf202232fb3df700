//! Client for the entity-recognition runtime.
//!
//! The runtime is a black-box HTTP service: `POST /v1/entities` with the
//! text, back comes a list of `{category, text, start, end}` spans with
//! byte offsets into the submitted text. Long documents are chunked with an
//! overlap and the results merged by absolute span, so the whole text is
//! always scanned, never a truncated prefix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("entity runtime not ready: {0}")]
    NotReady(String),
    #[error("entity request timed out")]
    Timeout,
    #[error("entity runtime returned http {status}")]
    Http { status: u16 },
    #[error("entity transport error: {0}")]
    Transport(String),
    #[error("malformed entity response: {0}")]
    Malformed(String),
}

/// One extracted entity with byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub category: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// The entity-recognition collaborator as seen by the matcher.
#[async_trait]
pub trait EntityModel: Send + Sync {
    /// Readiness probe run once at stage startup; failure is fatal for the
    /// detection stage before any store is touched.
    async fn ready(&self) -> Result<(), ModelError>;

    /// Extract entities over the full text.
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ModelError>;
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ExtractResponse {
    entities: Vec<EntitySpan>,
}

/// Bytes of trailing text re-submitted with the next chunk so an entity
/// sitting on a chunk boundary is still seen whole by one of the calls.
const CHUNK_OVERLAP: usize = 200;

pub struct HttpEntityModel {
    client: reqwest::Client,
    base_url: String,
    max_chunk_bytes: usize,
}

impl HttpEntityModel {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, max_chunk_bytes: usize) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // An unusable cap would chunk forever; clamp well above overlap.
            max_chunk_bytes: max_chunk_bytes.max(CHUNK_OVERLAP * 2),
        }
    }

    async fn extract_one(&self, text: &str) -> Result<Vec<EntitySpan>, ModelError> {
        let url = format!("{}/v1/entities", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&ExtractRequest { text })
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
            });
        }
        let body: ExtractResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        Ok(body.entities)
    }

    /// Split points for one chunk: `[start, end)` plus the next chunk start.
    fn chunk_bounds(&self, text: &str, start: usize) -> (usize, usize) {
        let mut end = (start + self.max_chunk_bytes).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end >= text.len() {
            return (end, text.len());
        }
        let mut next = end.saturating_sub(CHUNK_OVERLAP).max(start + 1);
        while !text.is_char_boundary(next) {
            next += 1;
        }
        (end, next)
    }
}

fn classify_reqwest(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(err.to_string())
    }
}

#[async_trait]
impl EntityModel for HttpEntityModel {
    async fn ready(&self) -> Result<(), ModelError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelError::NotReady(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ModelError::NotReady(format!("http {}", resp.status().as_u16())))
        }
    }

    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ModelError> {
        if text.len() <= self.max_chunk_bytes {
            return self.extract_one(text).await;
        }

        // Chunk-and-merge: offsets come back relative to each chunk and are
        // rebased to the whole document; spans seen twice through the
        // overlap collapse to one.
        let mut merged = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut start = 0usize;
        while start < text.len() {
            let (end, next) = self.chunk_bounds(text, start);
            let chunk = &text[start..end];
            for span in self.extract_one(chunk).await? {
                let abs = (span.start + start, span.end + start);
                if seen.insert(abs) {
                    merged.push(EntitySpan {
                        start: abs.0,
                        end: abs.1,
                        ..span
                    });
                }
            }
            if end >= text.len() {
                break;
            }
            start = next;
        }
        debug!(spans = merged.len(), "merged chunked entity extraction");
        Ok(merged)
    }
}
