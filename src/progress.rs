//! Load progress reporting.
//!
//! The driver emits structured [`IngestEvent`]s at two granularities: per
//! source unit and per record within a unit. A [`ProgressSink`] decides how
//! (and whether) to display them. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

use serde::Serialize;

use crate::models::Counts;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    /// A unit was parsed and its batch is about to be written.
    UnitStarted {
        unit: String,
        records: u64,
        /// 1-based position of the unit in the run.
        n: u64,
        total_units: u64,
    },
    /// One record of the unit finished (written or failed).
    RecordProcessed {
        unit: String,
        n: u64,
        total: u64,
        ok: bool,
    },
    /// All writes of the unit have completed.
    UnitCompleted { unit: String, counts: Counts },
    /// A record or a whole unit failed.
    Failure {
        unit: String,
        /// Position of the record in the unit; `None` for unit-level failures.
        record: Option<u64>,
        identity: Option<String>,
        kind: String,
        error: String,
    },
}

/// Consumes progress events. Called concurrently from write tasks.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Records between two human-readable record progress lines.
const HUMAN_RECORD_STRIDE: u64 = 500;

/// Human-friendly progress on stderr: "load 42  1,234 / 5,000 records".
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::UnitStarted {
                unit,
                records,
                n,
                total_units,
            } => format!(
                "load {}  [{} / {}]  {} records\n",
                unit,
                format_number(*n),
                format_number(*total_units),
                format_number(*records)
            ),
            IngestEvent::RecordProcessed { unit, n, total, .. } => {
                if *n != *total && *n % HUMAN_RECORD_STRIDE != 0 {
                    return;
                }
                format!(
                    "load {}  {} / {} records\n",
                    unit,
                    format_number(*n),
                    format_number(*total)
                )
            }
            IngestEvent::UnitCompleted { unit, counts } => format!(
                "load {}  done  {} ok, {} failed, {} skipped\n",
                unit,
                format_number(counts.succeeded),
                format_number(counts.failed),
                format_number(counts.skipped)
            ),
            IngestEvent::Failure {
                unit,
                record,
                identity,
                kind,
                error,
            } => match record {
                Some(index) => format!(
                    "load {}  record {} ({})  {}: {}\n",
                    unit,
                    index,
                    identity.as_deref().unwrap_or("no id"),
                    kind,
                    error
                ),
                None => format!("load {}  skipped unit  {}: {}\n", unit, kind, error),
            },
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn report(&self, event: IngestEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
