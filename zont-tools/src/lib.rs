//! Zont Tools - command-line exporters built on `zont-api`
//!
//! Shared pieces of the `zont-export`, `zont-prom-exporter` and `zont-dump`
//! binaries: argument parsing helpers, logging setup and metrics rendering.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, info, Level};

use zont_api::export::{ExportStats, TargetLayout};
use zont_api::logging::setup::{init_logging, LoggingConfig};
use zont_api::poller::{device_gauges, CachedMetricValue};

/// Output directory layout selected with `--period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Hourly,
    Daily,
}

impl From<Period> for TargetLayout {
    fn from(period: Period) -> Self {
        match period {
            Period::Hourly => TargetLayout::Hourly,
            Period::Daily => TargetLayout::Daily,
        }
    }
}

/// Parse `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d` as UTC.
pub fn parse_datetime(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(datetime.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
        .ok_or_else(|| {
            format!("invalid date {value:?}, expected \"YYYY-MM-DD\" or \"YYYY-MM-DD HH:MM:SS\"")
        })
}

/// Convert `--max-window-hours` into a window length.
pub fn max_window_from_hours(hours: u64) -> Result<Duration> {
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("--max-window-hours {hours} is out of range"))
}

/// Initialize tracing for a binary.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let config = if verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::default().with_level(Level::WARN)
    };
    init_logging(config.with_json_format(json)).map_err(|e| anyhow::anyhow!("{e}"))
}

/// Log the per-metric sample counts of an export.
pub fn log_summary(stats: &ExportStats) {
    info!("========[ summary of collected metrics follows ]========");
    for (metric, count) in stats.iter() {
        info!("{metric}: {count}");
    }
    info!("========[ {stats} ]========");
}

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render a cache snapshot in the Prometheus text format.
///
/// Every value also gets a `zont_metric_stale` sample so scrapers can tell
/// last-known-good values from fresh ones.
pub fn render_metrics(snapshot: &[CachedMetricValue]) -> Result<String> {
    let registry = Registry::new();

    let mut gauges = HashMap::new();
    for spec in device_gauges() {
        let gauge = GaugeVec::new(Opts::new(spec.name, spec.help), &["device_id", "sensor_id"])?;
        registry.register(Box::new(gauge.clone()))?;
        gauges.insert(spec.name, gauge);
    }
    let stale = GaugeVec::new(
        Opts::new(
            "zont_metric_stale",
            "Whether the cached value is older than the freshness threshold",
        ),
        &["metric", "device_id", "sensor_id"],
    )?;
    registry.register(Box::new(stale.clone()))?;

    for value in snapshot {
        let Some(gauge) = gauges.get(value.key.name.as_str()) else {
            debug!(metric = %value.key, "no gauge registered, skipping");
            continue;
        };
        let device_id = value.key.device_id.to_string();
        gauge
            .with_label_values(&[device_id.as_str(), value.key.sensor_id.as_str()])
            .set(value.value);
        stale
            .with_label_values(&[
                value.key.name.as_str(),
                device_id.as_str(),
                value.key.sensor_id.as_str(),
            ])
            .set(if value.stale { 1.0 } else { 0.0 });
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
