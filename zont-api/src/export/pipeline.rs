use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::{ZontError, ZontResult};
use crate::export::{ExportStats, MergeStats, Record, RecordSet, RecordStore};
use crate::timeseries::{Alignment, ExportBatch, RangeFetch, WindowSource};

/// How record files are spread over directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetLayout {
    /// Everything directly under the target directory.
    #[default]
    Flat,
    /// `<root>/%Y/%Y-%m/%Y-%m-%d/%H`
    Hourly,
    /// `<root>/%Y/%Y-%m/%Y-%m-%d`
    Daily,
}

impl TargetLayout {
    /// Directory receiving the records of a window starting at `start`.
    pub fn directory(&self, root: &Path, start: DateTime<Utc>) -> PathBuf {
        match self {
            TargetLayout::Flat => root.to_path_buf(),
            TargetLayout::Hourly => root.join(start.format("%Y/%Y-%m/%Y-%m-%d/%H").to_string()),
            TargetLayout::Daily => root.join(start.format("%Y/%Y-%m/%Y-%m-%d").to_string()),
        }
    }

    /// Window alignment this layout needs so no window straddles two directories.
    pub fn alignment(&self, requested: Alignment) -> Alignment {
        match (self, requested) {
            (TargetLayout::Flat, requested) => requested,
            (TargetLayout::Hourly, _) => Alignment::Hour,
            (TargetLayout::Daily, Alignment::Hour) => Alignment::Hour,
            (TargetLayout::Daily, _) => Alignment::Day,
        }
    }
}

/// Merge the samples of `batch` that belong to `existing`'s metric.
///
/// The result is re-verified before it is returned.
pub fn merge(mut existing: RecordSet, batch: &ExportBatch) -> ZontResult<(RecordSet, MergeStats)> {
    let incoming: Vec<Record> = batch
        .samples()
        .iter()
        .filter(|s| s.metric_id == existing.metric())
        .map(|s| Record::new(s.timestamp, s.value))
        .collect();

    let stats = existing.merge(incoming);
    existing.verify()?;
    Ok((existing, stats))
}

/// Outcome of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub merge: MergeStats,
    pub files_written: usize,
}

/// Outcome of a whole export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub windows: usize,
    pub merge: MergeStats,
    pub files_written: usize,
    pub completed_through: DateTime<Utc>,
}

/// Merges fetched batches into record files.
///
/// For every metric of a batch the exporter takes the file's writer lock,
/// loads and merges the stored history, and commits the result atomically.
/// Files whose content would not change are not rewritten.
#[derive(Debug)]
pub struct Exporter {
    root: PathBuf,
    layout: TargetLayout,
    delimiter: char,
    stats: ExportStats,
}

impl Exporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layout: TargetLayout::Flat,
            delimiter: ',',
            stats: ExportStats::new(),
        }
    }

    pub fn with_layout(mut self, layout: TargetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn layout(&self) -> TargetLayout {
        self.layout
    }

    /// Samples merged so far, per metric.
    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Store holding the records of a window starting at `start`.
    pub fn store_for(&self, start: DateTime<Utc>) -> RecordStore {
        RecordStore::new(self.layout.directory(&self.root, start)).with_delimiter(self.delimiter)
    }

    /// Merge one batch into storage.
    #[instrument(skip(self, batch), fields(window = %batch.window(), samples = batch.len()))]
    pub fn merge_batch(&mut self, batch: &ExportBatch) -> ZontResult<BatchSummary> {
        let store = self.store_for(batch.window().from());

        let mut grouped: BTreeMap<&str, Vec<Record>> = BTreeMap::new();
        for sample in batch.samples() {
            grouped
                .entry(sample.metric_id.as_str())
                .or_default()
                .push(Record::new(sample.timestamp, sample.value));
        }

        let mut summary = BatchSummary::default();
        for (metric, records) in grouped {
            let count = records.len();
            let oldest = records.iter().map(|r| r.timestamp).min().unwrap_or_default();
            let newest = records.iter().map(|r| r.timestamp).max().unwrap_or_default();

            let _lock = store.lock(metric)?;
            let mut set = store.load(metric)?;
            let merged = set.merge(records);

            if merged.changed() {
                store.commit(&set)?;
                summary.files_written += 1;
            } else {
                debug!(metric, "no changes, file left untouched");
            }

            summary.merge.absorb(merged);
            self.stats.update(metric, count, oldest, newest);
        }

        Ok(summary)
    }

    /// Drain `fetch`, merging each batch as it arrives.
    ///
    /// Batches merged before a failure stay committed. A fetch failure comes
    /// back as the fetch's `PartialExport` error; a failure to merge a batch is
    /// wrapped the same way, resuming at the start of that batch's window.
    pub async fn export<S: WindowSource>(
        &mut self,
        fetch: &mut RangeFetch<S>,
    ) -> ZontResult<ExportSummary> {
        let mut windows = 0;
        let mut merge = MergeStats::default();
        let mut files_written = 0;

        while let Some(batch) = fetch.next_batch().await {
            let batch = batch?;
            let summary = match self.merge_batch(&batch) {
                Ok(summary) => summary,
                Err(err) => {
                    let window = *batch.window();
                    warn!(%window, error = %err, "merge failed, export stopped");
                    return Err(ZontError::PartialExport {
                        completed_through: window.from(),
                        failed_window: window,
                        source: Box::new(err),
                    });
                }
            };

            info!(
                window = %batch.window(),
                samples = batch.len(),
                inserted = summary.merge.inserted,
                updated = summary.merge.updated,
                "window exported"
            );
            windows += 1;
            merge.absorb(summary.merge);
            files_written += summary.files_written;
        }

        Ok(ExportSummary {
            windows,
            merge,
            files_written,
            completed_through: fetch.completed_through(),
        })
    }
}
