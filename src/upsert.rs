//! Upsert engine.
//!
//! Writes one materialized [`Batch`] to a [`Store`]. Writes are dispatched
//! concurrently through `buffer_unordered`, so at most `concurrency` of them
//! are in flight at any time. A failing record never stops its siblings: the
//! failure is counted, reported, and the batch carries on.
//!
//! With a page size configured, records are grouped into pages and each page
//! is written in one store transaction. A page that fails as a whole is
//! retried record by record, which keeps the per-record accounting exact.
//!
//! Cancellation stops the dispatch of new writes; writes already in flight
//! run to completion.

use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::RecordError;
use crate::materialize::{Batch, Entry};
use crate::models::{Counts, StoredRow};
use crate::progress::{IngestEvent, ProgressSink};
use crate::store::Store;

/// A record that was not written, kept for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub index: u64,
    pub identity: Option<String>,
    pub kind: &'static str,
    pub message: String,
}

/// Result of writing one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub counts: Counts,
    pub failures: Vec<RecordFailure>,
}

/// Outcome of one dispatched record.
struct Written {
    index: usize,
    identity: Option<String>,
    result: Result<(), RecordError>,
}

pub struct UpsertEngine {
    store: Arc<dyn Store>,
    concurrency: usize,
    page_size: Option<usize>,
}

impl UpsertEngine {
    /// `concurrency` is clamped to at least 1.
    pub fn new(store: Arc<dyn Store>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
            page_size: None,
        }
    }

    /// Write pages of `page_size` records per transaction.
    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size.filter(|n| *n > 1);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Write every entry of `batch` and wait for all dispatched writes.
    pub async fn write_batch(
        &self,
        unit: &str,
        batch: Batch,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let total = batch.len() as u64;
        let mut outcome = BatchOutcome::default();
        if total == 0 {
            return outcome;
        }

        let pages = paginate(batch.entries, self.page_size.unwrap_or(1));
        debug!(
            unit,
            records = total,
            pages = pages.len(),
            concurrency = self.concurrency,
            "dispatching batch"
        );

        let writes = stream::iter(pages)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|page| self.write_page(page))
            .buffer_unordered(self.concurrency);
        let mut writes = std::pin::pin!(writes);

        let mut processed = 0u64;
        while let Some(page) = writes.next().await {
            for written in page {
                processed += 1;
                let ok = written.result.is_ok();
                match written.result {
                    Ok(()) => outcome.counts.record_success(),
                    Err(error) => {
                        outcome.counts.record_failure();
                        warn!(
                            unit,
                            record = written.index,
                            identity = written.identity.as_deref().unwrap_or(""),
                            kind = error.kind(),
                            error = %error,
                            "record not written"
                        );
                        progress.report(IngestEvent::Failure {
                            unit: unit.to_string(),
                            record: Some(written.index as u64),
                            identity: written.identity.clone(),
                            kind: error.kind().to_string(),
                            error: error.to_string(),
                        });
                        outcome.failures.push(RecordFailure {
                            index: written.index as u64,
                            identity: written.identity,
                            kind: error.kind(),
                            message: error.to_string(),
                        });
                    }
                }
                progress.report(IngestEvent::RecordProcessed {
                    unit: unit.to_string(),
                    n: processed,
                    total,
                    ok,
                });
            }
        }

        outcome.counts.skipped = total - outcome.counts.attempted;
        if outcome.counts.skipped > 0 {
            warn!(
                unit,
                skipped = outcome.counts.skipped,
                "load cancelled before every record was dispatched"
            );
        }
        outcome
    }

    async fn write_page(&self, page: Vec<(usize, Entry)>) -> Vec<Written> {
        let mut done = Vec::with_capacity(page.len());
        let mut indices = Vec::with_capacity(page.len());
        let mut rows = Vec::with_capacity(page.len());

        for (index, entry) in page {
            match entry
                .record
                .map_err(RecordError::from)
                .and_then(StoredRow::try_from)
            {
                Ok(row) => {
                    indices.push(index);
                    rows.push(row);
                }
                Err(error) => done.push(Written {
                    index,
                    identity: entry.identity,
                    result: Err(error),
                }),
            }
        }

        if self.page_size.is_some() && rows.len() > 1 {
            match self.store.upsert_many(&rows).await {
                Ok(()) => {
                    trace!(rows = rows.len(), "page written");
                    done.extend(indices.into_iter().zip(rows).map(|(index, row)| Written {
                        index,
                        identity: Some(row.identity),
                        result: Ok(()),
                    }));
                    return done;
                }
                Err(error) => warn!(
                    rows = rows.len(),
                    error = %error,
                    "page write failed, retrying records one by one"
                ),
            }
        }

        for (index, row) in indices.into_iter().zip(rows) {
            let result = self.store.upsert(&row).await.map_err(RecordError::from);
            done.push(Written {
                index,
                identity: Some(row.identity),
                result,
            });
        }
        done
    }
}

/// Split entries into pages of `size`, keeping each entry's batch index.
fn paginate(entries: Vec<Entry>, size: usize) -> Vec<Vec<(usize, Entry)>> {
    let mut entries = entries.into_iter().enumerate().peekable();
    let mut pages = Vec::new();
    while entries.peek().is_some() {
        pages.push(entries.by_ref().take(size.max(1)).collect());
    }
    pages
}
