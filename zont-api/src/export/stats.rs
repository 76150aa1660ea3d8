use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;

/// Per-metric sample counts and the overall time span of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    counts: BTreeMap<String, usize>,
    oldest: Option<i64>,
    newest: Option<i64>,
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `samples` more values for `metric`, widening the span to `[oldest, newest]`.
    pub fn update(&mut self, metric: &str, samples: usize, oldest: i64, newest: i64) {
        *self.counts.entry(metric.to_string()).or_insert(0) += samples;
        self.oldest = Some(self.oldest.map_or(oldest, |o| o.min(oldest)));
        self.newest = Some(self.newest.map_or(newest, |n| n.max(newest)));
    }

    pub fn merge(&mut self, other: &ExportStats) {
        for (metric, count) in &other.counts {
            *self.counts.entry(metric.clone()).or_insert(0) += count;
        }
        if let Some(oldest) = other.oldest {
            self.oldest = Some(self.oldest.map_or(oldest, |o| o.min(oldest)));
        }
        if let Some(newest) = other.newest {
            self.newest = Some(self.newest.map_or(newest, |n| n.max(newest)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_metrics(&self) -> usize {
        self.counts.len()
    }

    pub fn total_values(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn oldest(&self) -> Option<i64> {
        self.oldest
    }

    pub fn newest(&self) -> Option<i64> {
        self.newest
    }

    /// Metrics with their counts, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(m, c)| (m.as_str(), *c))
    }
}

impl fmt::Display for ExportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} metrics, {} values",
            self.total_metrics(),
            self.total_values()
        )?;
        if let (Some(oldest), Some(newest)) = (self.oldest, self.newest) {
            write!(
                f,
                ", oldest @ {} {}, newest @ {} {}",
                oldest,
                format_ts(oldest),
                newest,
                format_ts(newest)
            )?;
        }
        Ok(())
    }
}

fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_display() {
        assert_eq!(ExportStats::new().to_string(), "0 metrics, 0 values");
    }

    #[test]
    fn test_update_accumulates() {
        let mut stats = ExportStats::new();
        stats.update("a", 3, 1000, 1120);
        stats.update("b", 1, 900, 900);
        stats.update("a", 2, 1200, 1260);

        assert_eq!(stats.total_metrics(), 2);
        assert_eq!(stats.total_values(), 6);
        assert_eq!(stats.oldest(), Some(900));
        assert_eq!(stats.newest(), Some(1260));
        assert_eq!(
            stats.to_string(),
            "2 metrics, 6 values, oldest @ 900 1970-01-01 00:15:00, newest @ 1260 1970-01-01 00:21:00"
        );
    }

    #[test]
    fn test_merge() {
        let mut total = ExportStats::new();
        let mut run = ExportStats::new();
        run.update("a", 2, 10, 20);
        total.merge(&run);
        total.merge(&run);

        assert_eq!(total.iter().collect::<Vec<_>>(), vec![("a", 4)]);
        assert_eq!(total.oldest(), Some(10));
    }
}
