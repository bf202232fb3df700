//! The detection stage: scan fetched sources, stamp provenance, and append
//! only truly-new candidates to the Pending store.

use anyhow::{Context, Result};
use piiwatch_protocol::Candidate;
use piiwatch_store::{self as store, StoreLock, StorePaths};
use tracing::info;

use crate::matcher::Matcher;

/// One fetched page or file, already reduced to text by the content
/// fetcher. Fetch failures never reach the stage; the fetcher logs and
/// skips them per source.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub url: String,
    pub group: String,
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetectionOutcome {
    pub sources_scanned: usize,
    pub candidates_found: usize,
    pub appended: usize,
    pub skipped_known: usize,
    pub skipped_in_batch: usize,
}

/// Run one detection batch over the supplied sources.
///
/// The entity runtime is probed first; a dead runtime is fatal before any
/// store is touched. All scanning happens before the store lock is taken,
/// so the critical section is just read-filter-append.
pub async fn run_detection(
    paths: &StorePaths,
    matcher: &Matcher,
    sources: Vec<SourceText>,
) -> Result<DetectionOutcome> {
    matcher
        .model()
        .ready()
        .await
        .context("entity runtime readiness probe failed")?;

    let mut outcome = DetectionOutcome::default();
    let mut batch: Vec<Candidate> = Vec::new();
    for source in &sources {
        outcome.sources_scanned += 1;
        let findings = matcher.scan(&source.text).await;
        info!(source = %source.url, findings = findings.len(), "scanned source");
        batch.extend(findings.into_iter().map(|f| Candidate {
            kind: f.kind,
            content: f.content,
            context: f.context,
            source_url: source.url.clone(),
            source_group: source.group.clone(),
        }));
    }
    outcome.candidates_found = batch.len();

    let _lock = StoreLock::acquire(&paths.lock)?;
    let mut known = store::existing_keys_lenient(&paths.pending);
    known.extend(store::existing_keys(&paths.verified)?);
    let appended = store::append_pending(&paths.pending, &known, batch)?;
    outcome.appended = appended.appended;
    outcome.skipped_known = appended.skipped_known;
    outcome.skipped_in_batch = appended.skipped_in_batch;

    info!(
        sources = outcome.sources_scanned,
        found = outcome.candidates_found,
        appended = outcome.appended,
        skipped_known = outcome.skipped_known,
        skipped_in_batch = outcome.skipped_in_batch,
        "detection batch complete"
    );
    Ok(outcome)
}
