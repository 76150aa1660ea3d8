//! Zont Prometheus Exporter
//!
//! Polls current device state on a fixed interval and serves the cached
//! values on `/metrics`. Values survive failed polls and are flagged through
//! `zont_metric_stale` once they outlive the freshness threshold.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use zont_api::prelude::*;
use zont_tools::{init_tracing, render_metrics};

#[derive(Debug, Parser)]
#[command(
    name = "zont-prom-exporter",
    version,
    about = "Serve Zont device state as Prometheus metrics"
)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:6000")]
    listen: SocketAddr,

    /// Seconds between polls
    #[arg(long)]
    interval: Option<u64>,

    /// Seconds after which a cached value is reported stale
    #[arg(long)]
    freshness: Option<u64>,

    /// Poll a single device instead of every device on the account
    #[arg(long)]
    device: Option<i64>,

    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

async fn index() -> &'static str {
    "Try /metrics!\n"
}

async fn metrics(State(cache): State<MetricCache>) -> Response {
    match render_metrics(&cache.snapshot()) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("failed to render metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs)?;

    let mut config = ZontConfig::from_env()?;
    if let Some(interval) = args.interval {
        config = config.with_poll_interval(Duration::from_secs(interval));
    }
    if let Some(freshness) = args.freshness {
        config = config.with_freshness_threshold(Duration::from_secs(freshness));
    }
    config.validate()?;

    let api = ZontApi::new(ZontClient::new(config.clone())?);
    let source = match args.device {
        Some(id) => DeviceStateSource::for_device(api, id),
        None => DeviceStateSource::new(api),
    };
    let exporter = PollExporter::from_config(&config).with_source(Arc::new(source));
    let cache = exporter.cache();

    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = tokio::spawn(exporter.run(stop_rx));

    let app = Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(cache);

    let listener = TcpListener::bind(args.listen).await?;
    info!("Listening on http://{}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
            let _ = stop_tx.send(true);
        })
        .await?;

    let stats = poller.await?;
    info!(
        ticks = stats.ticks,
        updated = stats.updated,
        failed = stats.failed,
        "poller stopped"
    );
    Ok(())
}
