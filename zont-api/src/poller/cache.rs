use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::poller::{MetricKey, Reading};

/// A cached value as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMetricValue {
    pub key: MetricKey,
    pub value: f64,
    pub fetched_at: Instant,
    pub stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: f64,
    fetched_at: Instant,
    stale: bool,
}

type Table = Arc<HashMap<MetricKey, Entry>>;

/// Last-known-good value per metric.
///
/// Writers update the table copy-on-write under the write lock; readers clone
/// the current `Arc` and release the lock immediately, so a read never waits
/// on a fetch. Entries are never removed.
#[derive(Debug, Clone)]
pub struct MetricCache {
    table: Arc<RwLock<Table>>,
    freshness: Duration,
}

impl MetricCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            table: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
            freshness,
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Overwrite the given metrics with fresh values.
    pub fn update(&self, readings: impl IntoIterator<Item = Reading>) -> usize {
        let now = Instant::now();
        self.modify(|table| {
            let mut count = 0;
            for reading in readings {
                table.insert(
                    reading.key,
                    Entry {
                        value: reading.value,
                        fetched_at: now,
                        stale: false,
                    },
                );
                count += 1;
            }
            count
        })
    }

    /// Flag entries older than the freshness threshold; values are kept.
    pub fn mark_stale(&self) -> usize {
        let now = Instant::now();
        let freshness = self.freshness;
        self.modify(|table| {
            let mut marked = 0;
            for entry in table.values_mut() {
                if !entry.stale && now.duration_since(entry.fetched_at) > freshness {
                    entry.stale = true;
                    marked += 1;
                }
            }
            marked
        })
    }

    /// All cached values, sorted by key.
    ///
    /// Staleness is evaluated at read time, so an entry crosses the threshold
    /// even while no tick runs.
    pub fn snapshot(&self) -> Vec<CachedMetricValue> {
        let now = Instant::now();
        let table = self.current();
        let mut values: Vec<CachedMetricValue> = table
            .iter()
            .map(|(key, entry)| self.view(key, entry, now))
            .collect();
        values.sort_by(|a, b| a.key.cmp(&b.key));
        values
    }

    pub fn get(&self, key: &MetricKey) -> Option<CachedMetricValue> {
        let table = self.current();
        table
            .get(key)
            .map(|entry| self.view(key, entry, Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn view(&self, key: &MetricKey, entry: &Entry, now: Instant) -> CachedMetricValue {
        CachedMetricValue {
            key: key.clone(),
            value: entry.value,
            fetched_at: entry.fetched_at,
            stale: entry.stale || now.duration_since(entry.fetched_at) > self.freshness,
        }
    }

    fn current(&self) -> Table {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Read-modify-write under one write lock; tables held by readers are copied first.
    fn modify<R>(&self, f: impl FnOnce(&mut HashMap<MetricKey, Entry>) -> R) -> R {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        f(Arc::make_mut(&mut *guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> MetricKey {
        MetricKey::new(name, 1, "10")
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_threshold() {
        let cache = MetricCache::new(Duration::from_secs(180));
        cache.update(vec![Reading::new(key("t"), 21.5)]);

        tokio::time::advance(Duration::from_secs(179)).await;
        let fresh = cache.get(&key("t")).unwrap();
        assert!(!fresh.stale);

        tokio::time::advance(Duration::from_secs(2)).await;
        let stale = cache.get(&key("t")).unwrap();
        assert!(stale.stale);
        assert_eq!(stale.value, 21.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_clears_stale() {
        let cache = MetricCache::new(Duration::from_secs(10));
        cache.update(vec![Reading::new(key("t"), 1.0)]);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.mark_stale(), 1);
        assert_eq!(cache.mark_stale(), 0);

        cache.update(vec![Reading::new(key("t"), 2.0)]);
        let value = cache.get(&key("t")).unwrap();
        assert!(!value.stale);
        assert_eq!(value.value, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_update_keeps_others() {
        let cache = MetricCache::new(Duration::from_secs(60));
        cache.update(vec![
            Reading::new(key("a"), 1.0),
            Reading::new(key("b"), 2.0),
        ]);
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.update(vec![Reading::new(key("b"), 3.0)]);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key, key("a"));
        assert!(snapshot[0].stale);
        assert_eq!(snapshot[0].value, 1.0);
        assert!(!snapshot[1].stale);
        assert_eq!(snapshot[1].value, 3.0);
    }

    #[tokio::test]
    async fn test_snapshot_of_clone_shares_table() {
        let cache = MetricCache::new(Duration::from_secs(60));
        let reader = cache.clone();
        assert!(reader.is_empty());

        cache.update(vec![Reading::new(key("a"), 1.0)]);
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_keep_every_update() {
        let cache = MetricCache::new(Duration::from_secs(60));
        let snapshot = cache.snapshot();

        let writers: Vec<_> = (0..8i64)
            .map(|device| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for sensor in 0..50 {
                        let key = MetricKey::new("m", device, sensor.to_string());
                        cache.update(vec![Reading::new(key, sensor as f64)]);
                        cache.mark_stale();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(cache.len(), 400);
        assert!(snapshot.is_empty());
    }
}
