//! The training stage: select confirmed leaks not yet trained on, align
//! them, run the incremental fine-tune, and mark them processed.
//!
//! Marker bookkeeping happens strictly after a successful tune: a failed
//! update gets no partial credit and the same rows are selected again on
//! the next run.

use anyhow::Result;
use piiwatch_protocol::{IdentityKey, Label};
use piiwatch_store::{self as store, StoreLock, StorePaths};
use tracing::{info, warn};

use crate::align::align;
use crate::tuner::{TrainSample, Tuner};

#[derive(Debug, Default, Clone, Copy)]
pub struct TrainingOutcome {
    pub selected: usize,
    pub aligned: usize,
    pub skipped_unaligned: usize,
    pub trained_samples: usize,
}

/// Run one training batch over the Verified ledger.
pub async fn run_training(paths: &StorePaths, tuner: &dyn Tuner) -> Result<TrainingOutcome> {
    let _lock = StoreLock::acquire(&paths.lock)?;

    let verified = store::load_verified(&paths.verified)?;
    if verified.is_empty() {
        info!("verified ledger is empty; nothing to train on");
        return Ok(TrainingOutcome::default());
    }
    let trained = store::trained_keys(&paths.trained)?;

    // New leaks only: label LEAK, identity not yet in the marker ledger,
    // each identity at most once even if Verified carries it twice.
    let mut selected: Vec<IdentityKey> = Vec::new();
    let mut batch = Vec::new();
    let mut outcome = TrainingOutcome::default();
    for record in &verified {
        if record.label != Label::Leak {
            continue;
        }
        let key = record.identity();
        let line = key.marker_line();
        if trained.contains(&line) || selected.iter().any(|k| k.marker_line() == line) {
            continue;
        }
        selected.push(key);
        match align(&record.context, &record.content) {
            Some(seq) => {
                outcome.aligned += 1;
                batch.push(TrainSample::from(&seq));
            }
            None => {
                outcome.skipped_unaligned += 1;
                warn!(
                    content = %record.content,
                    "content not found verbatim in its context; skipping record"
                );
            }
        }
    }
    outcome.selected = selected.len();
    if selected.is_empty() {
        info!("no new confirmed leaks; zero model updates");
        return Ok(outcome);
    }
    if batch.is_empty() {
        warn!(
            selected = outcome.selected,
            "no alignable samples in selection; skipping the update"
        );
        return Ok(outcome);
    }

    info!(samples = batch.len(), "running incremental fine-tune");
    let report = tuner.fine_tune(&batch).await?;
    outcome.trained_samples = report.trained_samples;

    // Every selected identity is marked, including unalignable ones: they
    // were seen and skipped deliberately, and must not retry forever.
    store::append_trained(&paths.trained, &selected)?;
    info!(
        selected = outcome.selected,
        aligned = outcome.aligned,
        skipped = outcome.skipped_unaligned,
        trained = outcome.trained_samples,
        checkpoint = %report.checkpoint,
        "training batch complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::{TuneReport, TunerError};
    use async_trait::async_trait;
    use piiwatch_protocol::{Candidate, PiiType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTuner {
        calls: AtomicUsize,
        last_batch: Mutex<Vec<TrainSample>>,
        fail: bool,
    }

    #[async_trait]
    impl Tuner for RecordingTuner {
        async fn fine_tune(&self, samples: &[TrainSample]) -> Result<TuneReport, TunerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TunerError::Http { status: 500 });
            }
            *self.last_batch.lock().unwrap() = samples.to_vec();
            Ok(TuneReport {
                trained_samples: samples.len(),
                checkpoint: "/models/ner".into(),
            })
        }
    }

    fn seed_verified(paths: &StorePaths, rows: &[(&str, &str, Label)]) {
        let records: Vec<_> = rows
            .iter()
            .map(|(content, context, label)| {
                Candidate {
                    kind: PiiType::Email,
                    content: content.to_string(),
                    context: context.to_string(),
                    source_url: "u1".into(),
                    source_group: "web-crawl".into(),
                }
                .into_verified(*label, "seeded")
            })
            .collect();
        store::append_verified(&paths.verified, &records).unwrap();
    }

    #[tokio::test]
    async fn confirmed_leak_is_aligned_trained_and_marked() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(&paths, &[("a@b.com", "contact a@b.com now", Label::Leak)]);

        let tuner = RecordingTuner::default();
        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 1);
        assert_eq!(outcome.aligned, 1);
        assert_eq!(outcome.trained_samples, 1);

        let batch = tuner.last_batch.lock().unwrap();
        let sample = &batch[0];
        assert_eq!(sample.tokens[0], "[CLS]");
        let begins = sample
            .tags
            .iter()
            .filter(|t| **t == crate::align::Tag::Begin)
            .count();
        assert_eq!(begins, 1);

        let trained = store::trained_keys(&paths.trained).unwrap();
        assert!(trained.contains("a@b.com|u1"));
    }

    #[tokio::test]
    async fn rerun_with_no_new_leaks_performs_zero_updates() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(&paths, &[("a@b.com", "contact a@b.com now", Label::Leak)]);

        let tuner = RecordingTuner::default();
        run_training(&paths, &tuner).await.unwrap();
        let before = std::fs::read_to_string(&paths.trained).unwrap();

        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 0);
        assert_eq!(tuner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(&paths.trained).unwrap(), before);
    }

    #[tokio::test]
    async fn public_and_error_rows_are_never_trained_on() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(
            &paths,
            &[
                ("help@corp.io", "contact help@corp.io now", Label::Public),
                ("x@y.com", "contact x@y.com now", Label::Error),
            ],
        );
        let tuner = RecordingTuner::default();
        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 0);
        assert_eq!(tuner.calls.load(Ordering::SeqCst), 0);
        assert!(!paths.trained.exists());
    }

    #[tokio::test]
    async fn unalignable_leak_is_skipped_but_marked() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(
            &paths,
            &[
                ("gone@b.com", "context without the content", Label::Leak),
                ("a@b.com", "contact a@b.com now", Label::Leak),
            ],
        );
        let tuner = RecordingTuner::default();
        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 2);
        assert_eq!(outcome.aligned, 1);
        assert_eq!(outcome.skipped_unaligned, 1);

        // Both identities are marked; the unalignable one must not retry
        // forever on every later run.
        let trained = store::trained_keys(&paths.trained).unwrap();
        assert!(trained.contains("gone@b.com|u1"));
        assert!(trained.contains("a@b.com|u1"));
    }

    #[tokio::test]
    async fn failed_update_gets_no_partial_credit() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(&paths, &[("a@b.com", "contact a@b.com now", Label::Leak)]);

        let tuner = RecordingTuner {
            fail: true,
            ..Default::default()
        };
        assert!(run_training(&paths, &tuner).await.is_err());
        assert!(!paths.trained.exists());

        // The same row is selected again once the runtime recovers.
        let tuner = RecordingTuner::default();
        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 1);
        assert_eq!(outcome.trained_samples, 1);
    }

    #[tokio::test]
    async fn duplicate_identity_in_ledger_selects_once() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::under(dir.path());
        seed_verified(
            &paths,
            &[
                ("a@b.com", "contact a@b.com now", Label::Leak),
                ("a@b.com", "contact a@b.com again", Label::Leak),
            ],
        );
        let tuner = RecordingTuner::default();
        let outcome = run_training(&paths, &tuner).await.unwrap();
        assert_eq!(outcome.selected, 1);
        let trained = std::fs::read_to_string(&paths.trained).unwrap();
        assert_eq!(trained.matches("a@b.com|u1").count(), 1);
    }
}
