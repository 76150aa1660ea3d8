//! Merge-export pipeline: fetched batches into sorted, duplicate-free CSV files.
//!
//! A [`RecordSet`] is the complete history of one metric. [`Exporter`] merges
//! each [`ExportBatch`](crate::timeseries::ExportBatch) into the matching
//! record files through a [`RecordStore`], one locked writer per file.

mod pipeline;
mod record;
mod stats;
mod store;

pub use pipeline::{merge, BatchSummary, ExportSummary, Exporter, TargetLayout};
pub use record::{MergeStats, Record, RecordSet};
pub use stats::ExportStats;
pub use store::{RecordStore, TargetLock};
