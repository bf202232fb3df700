//! The verification stage: drain all of Pending through the oracle, append
//! the labeled rows to Verified, then delete Pending.
//!
//! Once a batch is dequeued it is never retried: a row whose oracle call
//! failed is recorded as an ERROR row rather than re-queued, so a failing
//! oracle cannot produce an infinite reprocessing loop. Retry policy, if
//! any, belongs inside the oracle call itself.

use std::time::Duration;

use anyhow::Result;
use piiwatch_protocol::Label;
use piiwatch_store::{self as store, StoreError, StoreLock, StorePaths};
use tracing::{info, warn};

use crate::client::Judge;

#[derive(Debug, Default, Clone, Copy)]
pub struct VerificationOutcome {
    pub drained: usize,
    pub labeled: usize,
    pub errored: usize,
}

/// Run one verification batch. The store lock is held for the whole run so
/// two overlapping schedules cannot both drain the same mailbox and write
/// duplicate verified rows.
pub async fn run_verification(
    paths: &StorePaths,
    judge: &dyn Judge,
    delay: Duration,
) -> Result<VerificationOutcome> {
    let _lock = StoreLock::acquire(&paths.lock)?;

    let pending = match store::load_pending(&paths.pending) {
        Ok(rows) => rows,
        Err(err @ StoreError::Corrupt { .. }) => {
            // Unrecoverable and regenerated by the next detection run;
            // retrying a corrupt mailbox would fail forever.
            warn!(error = %err, "pending store unreadable; deleting it");
            store::delete_pending(&paths.pending)?;
            return Ok(VerificationOutcome::default());
        }
        Err(err) => return Err(err.into()),
    };
    if pending.is_empty() {
        store::delete_pending(&paths.pending)?;
        info!("no pending candidates");
        return Ok(VerificationOutcome::default());
    }

    info!(count = pending.len(), "verifying pending candidates");
    let mut outcome = VerificationOutcome {
        drained: pending.len(),
        ..Default::default()
    };
    let mut verified = Vec::with_capacity(pending.len());
    let total = pending.len();
    for (i, cand) in pending.into_iter().enumerate() {
        // No re-filtering here: detection already guaranteed novelty.
        match judge.judge(&cand.context, &cand.content).await {
            Ok(judgment) => {
                outcome.labeled += 1;
                verified.push(cand.into_verified(judgment.label, judgment.reason));
            }
            Err(err) => {
                warn!(content = %cand.content, error = %err, "oracle call failed; recording ERROR row");
                outcome.errored += 1;
                verified.push(cand.into_verified(Label::Error, err.to_string()));
            }
        }
        if i + 1 < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    store::append_verified(&paths.verified, &verified)?;
    // Mailbox contract: the batch is consumed exactly once downstream, so
    // Pending goes away even when individual rows errored.
    store::delete_pending(&paths.pending)?;
    info!(
        drained = outcome.drained,
        labeled = outcome.labeled,
        errored = outcome.errored,
        "verification batch complete"
    );
    Ok(outcome)
}
