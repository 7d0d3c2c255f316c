//! Ingestion pipeline orchestration.
//!
//! Coordinates a full load: source units → classification → batch
//! materialization → upsert → status aggregation. Units are processed one
//! after the other (every write of a unit completes before the next unit is
//! read); the records of a unit are written concurrently by the
//! [`UpsertEngine`].
//!
//! Failures are recovered at the smallest scope: an unreadable unit is
//! skipped, a failed record is counted, and the run always completes with a
//! [`RunSummary`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::materialize::{materialize, visibility_for_unit};
use crate::models::Counts;
use crate::progress::{IngestEvent, ProgressMode, ProgressSink};
use crate::source::{scan_directory, SourceUnit};
use crate::store::Store;
use crate::tunnel::Tunnel;
use crate::upsert::{RecordFailure, UpsertEngine};

/// What happened to one source unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    /// Content could not be read or parsed; no record was written.
    Unreadable,
    /// The run was cancelled before the unit was read.
    NotStarted,
}

/// Per-unit result.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub visibility: bool,
    pub status: UnitStatus,
    pub records: u64,
    pub counts: Counts,
    pub error: Option<String>,
    pub failures: Vec<RecordFailure>,
}

impl UnitReport {
    fn new(name: &str, status: UnitStatus) -> Self {
        Self {
            name: name.to_string(),
            visibility: visibility_for_unit(name),
            status,
            records: 0,
            counts: Counts::default(),
            error: None,
            failures: Vec::new(),
        }
    }
}

/// Result of one full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub totals: Counts,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn unreadable_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Unreadable)
            .count()
    }

    /// Failed records per error kind, across all units.
    pub fn failures_by_kind(&self) -> BTreeMap<&'static str, u64> {
        let mut by_kind = BTreeMap::new();
        for failure in self.units.iter().flat_map(|u| &u.failures) {
            *by_kind.entry(failure.kind).or_insert(0) += 1;
        }
        by_kind
    }
}

/// The ingestion driver.
pub struct Ingestor {
    engine: UpsertEngine,
    progress: Arc<dyn ProgressSink>,
}

impl Ingestor {
    pub fn new(engine: UpsertEngine, progress: Arc<dyn ProgressSink>) -> Self {
        Self { engine, progress }
    }

    /// Build a driver whose engine follows the `[ingest]` settings.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let engine = UpsertEngine::new(store, config.ingest.concurrency)
            .with_page_size(config.ingest.page_size);
        Self::new(engine, progress)
    }

    /// Load every unit. Never fails: unit and record errors end up in the
    /// returned summary.
    pub async fn run(
        &self,
        units: Vec<Box<dyn SourceUnit>>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total_units = units.len() as u64;
        let mut reports = Vec::with_capacity(units.len());

        let span = info_span!("load", %run_id, backend = self.engine.store().backend());
        async {
            info!(units = total_units, "load started");
            for (i, unit) in units.iter().enumerate() {
                if cancel.is_cancelled() {
                    reports.push(UnitReport::new(unit.name(), UnitStatus::NotStarted));
                    continue;
                }
                let report = self
                    .load_unit(unit.as_ref(), i as u64 + 1, total_units, cancel)
                    .instrument(info_span!("unit", unit = unit.name()))
                    .await;
                reports.push(report);
            }
        }
        .instrument(span)
        .await;

        let mut totals = Counts::default();
        for report in &reports {
            totals.merge(&report.counts);
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            totals,
            units: reports,
        };
        info!(
            %run_id,
            attempted = totals.attempted,
            succeeded = totals.succeeded,
            failed = totals.failed,
            skipped = totals.skipped,
            unreadable_units = summary.unreadable_units(),
            cancelled = summary.cancelled,
            "load finished"
        );
        summary
    }

    async fn load_unit(
        &self,
        unit: &dyn SourceUnit,
        n: u64,
        total_units: u64,
        cancel: &CancellationToken,
    ) -> UnitReport {
        let name = unit.name();

        let content = match unit.read().await {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "skipping unreadable unit");
                self.progress.report(IngestEvent::Failure {
                    unit: name.to_string(),
                    record: None,
                    identity: None,
                    kind: "source_read".to_string(),
                    error: err.to_string(),
                });
                let mut report = UnitReport::new(name, UnitStatus::Unreadable);
                report.error = Some(err.to_string());
                return report;
            }
        };

        let mut report = UnitReport::new(name, UnitStatus::Completed);
        let batch = materialize(content, report.visibility);
        report.records = batch.len() as u64;
        debug!(
            records = report.records,
            rejected = batch.rejected(),
            visibility = report.visibility,
            "unit materialized"
        );

        self.progress.report(IngestEvent::UnitStarted {
            unit: name.to_string(),
            records: report.records,
            n,
            total_units,
        });

        let outcome = self
            .engine
            .write_batch(name, batch, self.progress.as_ref(), cancel)
            .await;
        report.counts = outcome.counts;
        report.failures = outcome.failures;

        self.progress.report(IngestEvent::UnitCompleted {
            unit: name.to_string(),
            counts: report.counts,
        });
        if report.counts.failed > 0 {
            warn!(
                succeeded = report.counts.succeeded,
                failed = report.counts.failed,
                "unit loaded with failures"
            );
        } else {
            debug!(succeeded = report.counts.succeeded, "unit loaded");
        }
        report
    }
}

/// Load every matching file of `in_directory` into the configured store.
///
/// Returns an error only when a precondition fails: the directory is
/// missing or not a directory, the tunnel cannot be opened, or the store
/// cannot be reached.
pub async fn run_load(
    config: &Config,
    in_directory: &Path,
    progress: ProgressMode,
) -> Result<RunSummary> {
    let units = scan_directory(in_directory, &config.ingest.pattern)?;
    info!(
        directory = %in_directory.display(),
        units = units.len(),
        "input directory scanned"
    );

    let tunnel = match &config.tunnel {
        Some(tunnel_config) => Some(Tunnel::open(tunnel_config).await?),
        None => None,
    };

    let store = db::connect(&config.db).await?;
    let ingestor = Ingestor::from_config(config, store.clone(), Arc::from(progress.sink()));

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_shutdown(
        cancel.clone(),
        config.ingest.timeout_secs.map(Duration::from_secs),
    ));

    let units: Vec<Box<dyn SourceUnit>> = units
        .into_iter()
        .map(|u| Box::new(u) as Box<dyn SourceUnit>)
        .collect();
    let summary = ingestor.run(units, &cancel).await;

    watcher.abort();
    store.close().await;
    if let Some(tunnel) = tunnel {
        tunnel.close().await;
    }

    print_summary(in_directory, &summary);
    Ok(summary)
}

/// Classify every unit of `in_directory` without touching the store.
pub async fn run_dry_run(ingest: &IngestConfig, in_directory: &Path) -> Result<()> {
    let units = scan_directory(in_directory, &ingest.pattern)?;

    let mut records = 0usize;
    let mut rejected = 0usize;
    let mut unkeyed = 0usize;
    let mut unreadable = 0usize;
    for unit in &units {
        match unit.read().await {
            Ok(content) => {
                let batch = materialize(content, visibility_for_unit(unit.name()));
                records += batch.len();
                rejected += batch.rejected();
                unkeyed += batch.records().filter(|r| r.identity.is_none()).count();
            }
            Err(err) => {
                warn!(unit = unit.name(), error = %err, "unreadable unit");
                unreadable += 1;
            }
        }
    }

    println!("load {} (dry-run)", in_directory.display());
    println!("  units found: {}", units.len());
    println!("  unreadable units: {}", unreadable);
    println!("  records: {}", records);
    println!("  unclassifiable: {}", rejected);
    println!("  missing id: {}", unkeyed);
    Ok(())
}

fn print_summary(in_directory: &Path, summary: &RunSummary) {
    println!("load {}", in_directory.display());
    println!("  run: {}", summary.run_id);
    println!(
        "  units: {} ({} unreadable)",
        summary.units.len(),
        summary.unreadable_units()
    );
    println!("  records attempted: {}", summary.totals.attempted);
    println!("  records succeeded: {}", summary.totals.succeeded);
    println!("  records failed: {}", summary.totals.failed);
    for (kind, n) in summary.failures_by_kind() {
        println!("    {}: {}", kind, n);
    }
    if summary.totals.skipped > 0 {
        println!("  records skipped: {}", summary.totals.skipped);
    }
    println!(
        "  elapsed: {:.2}s",
        (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!("{}", if summary.cancelled { "cancelled" } else { "ok" });
}

/// Cancel `token` on Ctrl+C, SIGTERM, or after `timeout`.
async fn cancel_on_shutdown(token: CancellationToken, timeout: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, finishing in-flight writes"),
        _ = terminate => warn!("Received terminate signal, finishing in-flight writes"),
        _ = deadline => warn!("Load timeout reached, finishing in-flight writes"),
    }
    token.cancel();
}
