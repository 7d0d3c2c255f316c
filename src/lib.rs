//! # asset-loader
//!
//! Batch loader for JSON asset snapshots.
//!
//! Every `*.json` file of an input directory is one batch. Each element of a
//! batch is classified (category and revision fields), tagged with the
//! visibility derived from the file name, and upserted into a single table
//! keyed on `(identity, revision)`. Writes inside a batch run concurrently;
//! a failed record or an unreadable file is counted and skipped, never
//! fatal.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ SourceUnits │──▶│  Materialize │──▶│ UpsertEngine │──▶│   Store   │
//! │  *.json     │   │  + classify  │   │  (bounded)   │   │ PG/SQLite │
//! └─────────────┘   └──────────────┘   └──────┬───────┘   └───────────┘
//!                                             │
//!                                             ▼
//!                                     ┌──────────────┐
//!                                     │ ProgressSink │
//!                                     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML / environment configuration |
//! | [`models`] | Records, stored rows, counts |
//! | [`error`] | Error kinds |
//! | [`classify`] | Category and revision derivation |
//! | [`materialize`] | Unit content → batch of records |
//! | [`source`] | Source units and directory scanning |
//! | [`upsert`] | Concurrent batch writes |
//! | [`ingest`] | Run orchestration |
//! | [`store`] | Storage backends |
//! | [`db`] | Store connection |
//! | [`schema`] | Table creation |
//! | [`tunnel`] | SSH port forwarding |
//! | [`progress`] | Progress events |
//! | [`logging`] | Diagnostic logging |

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod materialize;
pub mod models;
pub mod progress;
pub mod schema;
pub mod source;
pub mod store;
pub mod tunnel;
pub mod upsert;
