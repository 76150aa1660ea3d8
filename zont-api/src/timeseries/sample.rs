use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// UNIX timestamp in seconds.
    pub timestamp: i64,
    pub metric_id: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Sample {
    pub fn new(timestamp: i64, metric_id: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            metric_id: metric_id.into(),
            value,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// The timestamp as a UTC instant, if representable.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}
