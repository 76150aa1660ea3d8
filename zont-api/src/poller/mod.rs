//! Live metrics: a periodic poll loop feeding a last-known-good cache.
//!
//! [`PollExporter`] polls every registered [`PollSource`] on a fixed interval
//! and writes the readings into a [`MetricCache`]. Consumers (for example a
//! `/metrics` handler) read snapshots from a cloned cache handle without ever
//! waiting on a fetch.

mod cache;
mod exporter;
mod source;

pub use cache::{CachedMetricValue, MetricCache};
pub use exporter::{PollExporter, PollState, PollerStats, TickOutcome};
pub use source::{
    device_gauges, device_readings, DeviceStateSource, GaugeSpec, MetricKey, PollSource, Reading,
    BOILER_ERROR, BOILER_FAILED, INDOOR_AIR_TEMP, INPUT_VOLTAGE,
};
