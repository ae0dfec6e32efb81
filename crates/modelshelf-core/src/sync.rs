//! Reconciles walker output with the `models` table: prune records whose files
//! vanished under the scanned root, then upsert the discovered files in
//! batched transactions.

use crate::error::Error;
use crate::storage::models::{ScannedModel, UpsertCounts};
use crate::storage::Database;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A batch that failed twice and was rolled back.
#[derive(Debug)]
pub struct FailedBatch {
    pub index: usize,
    pub rows: usize,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub counts: UpsertCounts,
    pub batches: usize,
    pub retried_batches: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub cancelled: bool,
}

impl SyncReport {
    /// Rows whose batch committed.
    pub fn committed_rows(&self) -> usize {
        self.counts.total()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty() && !self.cancelled
    }
}

/// Delete every stored model under `root` for which `exists` is false, along
/// with its tag links, in one transaction. Records outside `root` are never
/// looked at.
pub fn prune_missing(
    db: &Database,
    root: &str,
    exists: impl Fn(&Path) -> bool,
) -> Result<usize, Error> {
    let stale: Vec<i64> = db
        .model_ids_under(root)?
        .into_iter()
        .filter(|(_, path)| !exists(Path::new(path)))
        .map(|(id, _)| id)
        .collect();

    if stale.is_empty() {
        debug!("No stale models under {}", root);
        return Ok(0);
    }

    let removed = db.delete_models(&stale)?;
    db.repair_model_tags()?;
    info!("Removed {} non-existent files under {}", removed, root);
    Ok(removed)
}

/// [`prune_missing`] against the real filesystem.
pub fn prune_missing_files(db: &Database, root: &str) -> Result<usize, Error> {
    prune_missing(db, root, |path| path.exists())
}

/// Upsert one batch, retrying once if the transaction fails.
pub fn sync_batch(
    db: &Database,
    batch: &[ScannedModel],
    index: usize,
    committed: usize,
) -> Result<(UpsertCounts, bool), Error> {
    match db.upsert_models(batch) {
        Ok(counts) => Ok((counts, false)),
        Err(first) => {
            warn!("Batch {} rolled back ({}), retrying once", index, first);
            match db.upsert_models(batch) {
                Ok(counts) => Ok((counts, true)),
                Err(source) => Err(Error::Transaction {
                    batch: index,
                    committed,
                    source,
                }),
            }
        }
    }
}

/// Upsert `models` in batches of `batch_size`, one transaction per batch.
///
/// `on_progress(processed, total)` fires after each batch. A batch that fails
/// twice is recorded in the report and the remaining batches still run;
/// batches already committed are unaffected. Cancellation is honoured between
/// batches.
pub fn sync_files(
    db: &Database,
    models: &[ScannedModel],
    batch_size: usize,
    cancel: Option<&AtomicBool>,
    mut on_progress: impl FnMut(usize, usize),
) -> SyncReport {
    let total = models.len();
    let mut report = SyncReport::default();
    let mut processed = 0;

    for (index, batch) in models.chunks(batch_size.max(1)).enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            info!("Sync cancelled after {} of {} files", processed, total);
            report.cancelled = true;
            break;
        }

        match sync_batch(db, batch, index, report.committed_rows()) {
            Ok((counts, retried)) => {
                report.counts.add(counts);
                if retried {
                    report.retried_batches += 1;
                }
            }
            Err(err) => {
                error!("{}", err);
                report.retried_batches += 1;
                report.failed_batches.push(FailedBatch {
                    index,
                    rows: batch.len(),
                    error: err,
                });
            }
        }

        report.batches += 1;
        processed += batch.len();
        on_progress(processed, total);
    }

    report
}
