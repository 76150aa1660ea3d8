//! Zont Export
//!
//! Exports device time series for a date range into per-metric CSV files.
//! Re-running over an overlapping range only rewrites values that changed.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use zont_api::prelude::*;
use zont_tools::{init_tracing, log_summary, max_window_from_hours, parse_datetime, Period};

#[derive(Debug, Parser)]
#[command(name = "zont-export", version, about = "Export Zont time series into sorted CSV files")]
struct Args {
    /// Start of the range, `YYYY-MM-DD[ HH:MM:SS]` (UTC)
    #[arg(long, value_parser = parse_datetime)]
    from: DateTime<Utc>,

    /// End of the range, exclusive
    #[arg(long, value_parser = parse_datetime)]
    to: DateTime<Utc>,

    /// Split output into hourly or daily directories
    #[arg(long, value_enum)]
    period: Option<Period>,

    /// Drop consecutive samples repeating the previous value
    #[arg(long)]
    filter_duplicates: bool,

    #[arg(long, default_value = "data")]
    targetdir: PathBuf,

    /// Export a single device instead of every device on the account
    #[arg(long)]
    device: Option<i64>,

    /// Longest span requested in one call
    #[arg(long)]
    max_window_hours: Option<u64>,

    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs)?;

    let mut config = ZontConfig::from_env()?;
    if let Some(hours) = args.max_window_hours {
        config = config.with_max_window(max_window_from_hours(hours)?);
    }
    let api = ZontApi::new(ZontClient::new(config.clone())?);

    let devices: Vec<i64> = match args.device {
        Some(id) => vec![id],
        None => api.devices().await?.iter().map(Device::id).collect(),
    };
    if devices.is_empty() {
        warn!("no devices found");
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current window");
            let _ = stop_tx.send(true);
        }
    });

    let layout = args.period.map(TargetLayout::from).unwrap_or_default();
    let mut exporter = Exporter::new(args.targetdir.clone()).with_layout(layout);

    for device_id in devices {
        let plan = WindowPlan::new(
            args.from,
            args.to,
            config.max_window(),
            layout.alignment(Alignment::None),
        )?;
        let metrics = MetricSet::new(device_id).with_filter_duplicates(args.filter_duplicates);
        let mut fetch = api
            .fetch_range(metrics, plan)
            .with_cancellation(stop_rx.clone());

        match exporter.export(&mut fetch).await {
            Ok(summary) => info!(
                device_id,
                windows = summary.windows,
                inserted = summary.merge.inserted,
                updated = summary.merge.updated,
                files = summary.files_written,
                "device exported"
            ),
            Err(e) => {
                log_summary(exporter.stats());
                match e.resume_from() {
                    Some(resume) => error!(
                        device_id,
                        "export stopped: {e}; resume with --from \"{}\"",
                        resume.format("%Y-%m-%d %H:%M:%S")
                    ),
                    None => error!(device_id, "export failed: {e}"),
                }
                process::exit(1);
            }
        }
    }

    log_summary(exporter.stats());
    Ok(())
}
