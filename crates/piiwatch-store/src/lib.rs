//! Durable stores backing the pipeline: the Pending queue, the Verified
//! ledger, and the trained-marker ledger, plus the dedup discipline that
//! keeps each identity key flowing through each stage at most once.
//!
//! Pending and Verified are tabular UTF-8 files with a header row; the
//! marker store is newline-delimited `content|source_url` lines. All writes
//! are append-only and happen after the full batch has been filtered, so a
//! killed process leaves the store in its pre-batch state.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use piiwatch_protocol::{Candidate, IdentityKey, VerifiedRecord};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable store at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, detail: impl ToString) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

/// Locations of the three stores plus the advisory lock file.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub pending: PathBuf,
    pub verified: PathBuf,
    pub trained: PathBuf,
    pub lock: PathBuf,
}

impl StorePaths {
    /// Conventional layout under a single data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self {
            pending: data_dir.join("pending.csv"),
            verified: data_dir.join("verified.csv"),
            trained: data_dir.join("trained.marker"),
            lock: data_dir.join("piiwatch.lock"),
        }
    }
}

/// Exclusive advisory lock held for the duration of a stage's
/// read-filter-append critical section.
///
/// Overlapping scheduled runs block here instead of interleaving store
/// writes. The lock file is created on demand and released on drop.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::io(path, e))?;
        debug!(lock = %path.display(), "store lock acquired");
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Outcome of a filtered append to the Pending store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    pub skipped_known: usize,
    pub skipped_in_batch: usize,
}

fn is_missing_or_empty(path: &Path) -> Result<bool, StoreError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Load the set of `(content, source_url)` keys present in a tabular store.
///
/// Works on both Pending and Verified since it resolves columns by header
/// name. A missing or zero-length store is the empty set, not an error.
pub fn existing_keys(path: &Path) -> Result<HashSet<IdentityKey>, StoreError> {
    if is_missing_or_empty(path)? {
        return Ok(HashSet::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::corrupt(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| StoreError::corrupt(path, e))?
        .clone();
    let content_idx = headers
        .iter()
        .position(|h| h == "content")
        .ok_or_else(|| StoreError::corrupt(path, "missing `content` column"))?;
    let url_idx = headers
        .iter()
        .position(|h| h == "source_url")
        .ok_or_else(|| StoreError::corrupt(path, "missing `source_url` column"))?;

    let mut keys = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| StoreError::corrupt(path, e))?;
        let content = record
            .get(content_idx)
            .ok_or_else(|| StoreError::corrupt(path, "short row"))?;
        let url = record
            .get(url_idx)
            .ok_or_else(|| StoreError::corrupt(path, "short row"))?;
        keys.insert(IdentityKey::new(content, url));
    }
    Ok(keys)
}

/// Load every row of the Pending store. Missing or zero-length is an empty
/// batch; a file that exists but cannot be parsed is `Corrupt`, and the
/// verification stage deletes it rather than retrying.
pub fn load_pending(path: &Path) -> Result<Vec<Candidate>, StoreError> {
    if is_missing_or_empty(path)? {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::corrupt(path, e))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<Candidate>() {
        rows.push(row.map_err(|e| StoreError::corrupt(path, e))?);
    }
    Ok(rows)
}

/// Load every row of the Verified ledger. Unlike Pending, a corrupt
/// Verified store is a hard error: it is a ledger, not a queue, and its
/// contents cannot be regenerated.
pub fn load_verified(path: &Path) -> Result<Vec<VerifiedRecord>, StoreError> {
    if is_missing_or_empty(path)? {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::corrupt(path, e))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<VerifiedRecord>() {
        rows.push(row.map_err(|e| StoreError::corrupt(path, e))?);
    }
    Ok(rows)
}

fn open_append(path: &Path) -> Result<(File, bool), StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(path, e))?;
    }
    let write_header = is_missing_or_empty(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    Ok((file, write_header))
}

/// Filter a detection batch against the known keys and append the survivors
/// to Pending.
///
/// Filtering also dedupes *within* the batch itself: scanning the raw and
/// the rendered text of one page can emit the same `(content, source_url)`
/// twice, and only the first occurrence may reach the store. When nothing
/// survives, no file is created.
pub fn append_pending(
    path: &Path,
    known: &HashSet<IdentityKey>,
    batch: Vec<Candidate>,
) -> Result<AppendOutcome, StoreError> {
    let mut outcome = AppendOutcome::default();
    let mut seen: HashSet<IdentityKey> = HashSet::new();
    let mut survivors = Vec::new();
    for cand in batch {
        let key = cand.identity();
        if known.contains(&key) {
            outcome.skipped_known += 1;
            continue;
        }
        if !seen.insert(key) {
            outcome.skipped_in_batch += 1;
            continue;
        }
        survivors.push(cand);
    }
    if survivors.is_empty() {
        return Ok(outcome);
    }

    let (file, write_header) = open_append(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    for cand in &survivors {
        writer
            .serialize(cand)
            .map_err(|e| StoreError::corrupt(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))?;
    outcome.appended = survivors.len();
    Ok(outcome)
}

/// Append verified rows. No filtering: the detection stage guaranteed
/// novelty before the rows entered Pending.
pub fn append_verified(path: &Path, rows: &[VerifiedRecord]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    let (file, write_header) = open_append(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| StoreError::corrupt(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}

/// Delete the Pending store. Missing is fine; the mailbox was already empty.
pub fn delete_pending(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Load the trained-marker ledger as a set of whole `content|source_url`
/// lines. Membership checks compare the rendered line, never parsed fields.
pub fn trained_keys(path: &Path) -> Result<HashSet<String>, StoreError> {
    if is_missing_or_empty(path)? {
        return Ok(HashSet::new());
    }
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut keys = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| StoreError::io(path, e))?;
        let line = line.trim();
        if !line.is_empty() {
            keys.insert(line.to_string());
        }
    }
    Ok(keys)
}

/// Append identities to the trained-marker ledger, one line each. The
/// ledger only grows; pruning is an operational concern outside the core.
pub fn append_trained(path: &Path, keys: &[IdentityKey]) -> Result<(), StoreError> {
    if keys.is_empty() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(path, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    for key in keys {
        writeln!(file, "{}", key.marker_line()).map_err(|e| StoreError::io(path, e))?;
    }
    file.flush().map_err(|e| StoreError::io(path, e))
}

/// Best-effort lenient variant of [`existing_keys`] for the detection path:
/// an unreadable store logs a warning and dedups against nothing, matching
/// the queue's self-healing behavior (verification will delete a corrupt
/// Pending on its next run).
pub fn existing_keys_lenient(path: &Path) -> HashSet<IdentityKey> {
    match existing_keys(path) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(store = %path.display(), error = %err, "unreadable store; deduping against empty set");
            HashSet::new()
        }
    }
}
