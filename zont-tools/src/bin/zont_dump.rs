//! Zont Dump
//!
//! Prints devices, their sensors or recent time series as JSON, with
//! personal data masked.

use anyhow::Result;
use chrono::{Duration, DurationRound, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use zont_api::device::SensorFamily;
use zont_api::prelude::*;
use zont_tools::{init_tracing, print_json};

#[derive(Debug, Parser)]
#[command(name = "zont-dump", version, about = "Dump Zont API data as JSON")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Devices with their full state
    Devices,
    /// Configured sensors of every device
    Sensors,
    /// Recent time series of every device
    Timeseries {
        /// How far back to look
        #[arg(long, default_value_t = 5)]
        minutes: i64,

        #[arg(long)]
        device: Option<i64>,
    },
}

fn sensors(device: &Device) -> Result<Value> {
    let mut families = serde_json::Map::new();
    for family in SensorFamily::ALL {
        let sensors = device.sensors(family);
        if !sensors.is_empty() {
            families.insert(family.as_str().to_string(), serde_json::to_value(sensors)?);
        }
    }
    Ok(json!({
        "device_id": device.id(),
        "name": device.name(),
        "sensors": families,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, false)?;

    let api = ZontApi::new(ZontClient::new(ZontConfig::from_env()?)?);
    let devices = api.devices().await?;

    match args.command {
        Command::Devices => {
            let raw: Vec<Value> = devices.iter().map(|d| d.raw().clone()).collect();
            print_json(&Value::Array(raw))?;
        }
        Command::Sensors => {
            let listing = devices.iter().map(sensors).collect::<Result<Vec<_>>>()?;
            print_json(&Value::Array(listing))?;
        }
        Command::Timeseries { minutes, device } => {
            let to = Utc::now().duration_trunc(Duration::seconds(1))?;
            let from = to - Duration::minutes(minutes);

            let mut series = Vec::new();
            for d in devices.iter().filter(|d| device.map_or(true, |id| d.id() == id)) {
                let response = api.load_data(d.id(), &[], from, to).await?;
                series.push(response.into_value());
            }
            print_json(&Value::Array(series))?;
        }
    }
    Ok(())
}
