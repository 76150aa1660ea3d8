use crate::error::{ZontError, ZontResult};

/// One stored row: a timestamp and its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub timestamp: i64,
    pub value: f64,
}

impl Record {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Counts from a single [`RecordSet::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeStats {
    /// Whether the merge changed anything that has to be written.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }

    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Full history of one metric: strictly ascending, unique timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    metric: String,
    records: Vec<Record>,
}

impl RecordSet {
    /// An empty history.
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            records: Vec::new(),
        }
    }

    /// Wrap existing rows, failing if they are out of order or repeat a timestamp.
    pub fn from_records(metric: impl Into<String>, records: Vec<Record>) -> ZontResult<Self> {
        let set = Self {
            metric: metric.into(),
            records,
        };
        set.verify()?;
        Ok(set)
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge incoming rows; for equal timestamps the incoming value wins.
    ///
    /// Rows that already hold the same value are left untouched, so merging
    /// the same batch twice reports no changes the second time. Incoming rows
    /// repeating a timestamp are collapsed to the last one.
    pub fn merge<I>(&mut self, incoming: I) -> MergeStats
    where
        I: IntoIterator<Item = Record>,
    {
        let mut batch: Vec<Record> = incoming.into_iter().collect();
        batch.sort_by_key(|r| r.timestamp);

        let mut deduped: Vec<Record> = Vec::with_capacity(batch.len());
        for record in batch {
            match deduped.last_mut() {
                Some(last) if last.timestamp == record.timestamp => *last = record,
                _ => deduped.push(record),
            }
        }

        let mut stats = MergeStats::default();
        let mut merged = Vec::with_capacity(self.records.len() + deduped.len());
        let mut existing = std::mem::take(&mut self.records).into_iter().peekable();

        for record in deduped {
            while let Some(older) = existing.next_if(|e| e.timestamp < record.timestamp) {
                merged.push(older);
            }
            match existing.next_if(|e| e.timestamp == record.timestamp) {
                Some(current) if same_value(current.value, record.value) => {
                    stats.unchanged += 1;
                    merged.push(current);
                }
                Some(_) => {
                    stats.updated += 1;
                    merged.push(record);
                }
                None => {
                    stats.inserted += 1;
                    merged.push(record);
                }
            }
        }
        merged.extend(existing);

        self.records = merged;
        stats
    }

    /// Check ordering and uniqueness.
    pub fn verify(&self) -> ZontResult<()> {
        for (row, pair) in self.records.windows(2).enumerate() {
            if pair[0].timestamp >= pair[1].timestamp {
                return Err(ZontError::IntegrityViolation {
                    metric: self.metric.clone(),
                    detail: format!(
                        "timestamp {} at row {} does not follow {}",
                        pair[1].timestamp,
                        row + 1,
                        pair[0].timestamp
                    ),
                });
            }
        }
        Ok(())
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
