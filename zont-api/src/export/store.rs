use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::error::{ZontError, ZontResult};
use crate::export::{Record, RecordSet};

/// Exclusive hold on one metric's record file; released on drop.
#[derive(Debug)]
pub struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Directory of `<metric>.csv` record files.
///
/// Each file starts with a `timestamp<d><metric>` header followed by one
/// `timestamp<d>value` row per sample, ascending by timestamp.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    delimiter: char,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            delimiter: ',',
        }
    }

    /// Use another field delimiter, e.g. `;` for legacy exports.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn path_for(&self, metric: &str) -> PathBuf {
        self.root.join(format!("{metric}.csv"))
    }

    /// Take the advisory writer lock for `metric` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ZontError::TargetLocked`] if another writer holds it.
    pub fn lock(&self, metric: &str) -> ZontResult<TargetLock> {
        check_metric(metric)?;
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{metric}.csv.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(TargetLock { file, path }),
            Err(e) if e.kind() == IoErrorKind::WouldBlock
                || e.kind() == fs2::lock_contended_error().kind() =>
            {
                Err(ZontError::TargetLocked { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a metric's history; a missing file is an empty history.
    ///
    /// # Errors
    ///
    /// Returns [`ZontError::IntegrityViolation`] if the file is malformed or unsorted.
    #[instrument(skip(self))]
    pub fn load(&self, metric: &str) -> ZontResult<RecordSet> {
        check_metric(metric)?;
        let path = self.path_for(metric);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(RecordSet::new(metric)),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut lines = BufReader::new(file).lines();

        if let Some(header) = lines.next() {
            let header = header?;
            let expected = format!("timestamp{}{metric}", self.delimiter);
            if header.trim_end() != expected {
                return Err(integrity(metric, format!("unexpected header {header:?}")));
            }
        }

        for (index, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let row = index + 2;
            let (timestamp, value) = line
                .split_once(self.delimiter)
                .ok_or_else(|| integrity(metric, format!("line {row}: missing delimiter")))?;
            let timestamp = timestamp
                .parse::<i64>()
                .map_err(|_| {
                    integrity(metric, format!("line {row}: bad timestamp {timestamp:?}"))
                })?;
            let value = value
                .parse::<f64>()
                .map_err(|_| integrity(metric, format!("line {row}: bad value {value:?}")))?;
            records.push(Record::new(timestamp, value));
        }

        debug!(records = records.len(), path = %path.display(), "records loaded");
        RecordSet::from_records(metric, records)
    }

    /// Atomically replace a metric's file with `set`.
    ///
    /// The set is verified first; on any failure the existing file is left as it was.
    #[instrument(skip(self, set), fields(metric = set.metric(), records = set.len()))]
    pub fn commit(&self, set: &RecordSet) -> ZontResult<()> {
        check_metric(set.metric())?;
        set.verify()?;
        fs::create_dir_all(&self.root)?;

        let mut temp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            writeln!(writer, "timestamp{}{}", self.delimiter, set.metric())?;
            for record in set.records() {
                writeln!(writer, "{}{}{}", record.timestamp, self.delimiter, record.value)?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(self.path_for(set.metric()))
            .map_err(|e| ZontError::Io(e.error))?;

        debug!("records committed");
        Ok(())
    }

    /// Re-read a stored file and check it; returns the number of rows.
    pub fn verify(&self, metric: &str) -> ZontResult<usize> {
        self.load(metric).map(|set| set.len())
    }
}

/// Metric names become file names and must stay inside the store.
fn check_metric(metric: &str) -> ZontResult<()> {
    if metric.is_empty()
        || metric.starts_with('.')
        || metric.contains(['/', '\\'])
        || metric.chars().any(char::is_control)
    {
        return Err(ZontError::validation(format!(
            "metric name {metric:?} is not usable as a file name"
        )));
    }
    Ok(())
}

fn integrity(metric: &str, detail: String) -> ZontError {
    ZontError::IntegrityViolation {
        metric: metric.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_and_load() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let set = RecordSet::from_records(
            "device_1.temp",
            vec![Record::new(1000, 21.5), Record::new(1060, 22.0)],
        )
        .unwrap();
        store.commit(&set).unwrap();

        let contents = fs::read_to_string(store.path_for("device_1.temp")).unwrap();
        assert_eq!(contents, "timestamp,device_1.temp\n1000,21.5\n1060,22\n");
        assert_eq!(store.load("device_1.temp").unwrap(), set);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(store.load("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_semicolon_delimiter() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path()).with_delimiter(';');
        fs::write(store.path_for("m"), "timestamp;m\n1;2.5\n2;3\n").unwrap();

        let set = store.load("m").unwrap();
        assert_eq!(set.records(), &[Record::new(1, 2.5), Record::new(2, 3.0)]);
    }

    #[test]
    fn test_unsorted_file_is_integrity_violation() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        fs::write(store.path_for("m"), "timestamp,m\n2,1\n1,1\n").unwrap();

        assert!(matches!(
            store.verify("m"),
            Err(ZontError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn test_malformed_row() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        fs::write(store.path_for("m"), "timestamp,m\n1,abc\n").unwrap();

        let err = store.load("m").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_rejects_path_like_metric() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(matches!(
            store.load("../escape"),
            Err(ZontError::Validation { .. })
        ));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let held = store.lock("m").unwrap();
        assert!(matches!(
            store.lock("m"),
            Err(ZontError::TargetLocked { .. })
        ));

        drop(held);
        assert!(store.lock("m").is_ok());
    }
}
