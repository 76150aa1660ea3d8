//! # zont-api
//!
//! Client library for the Zont heating-controller telemetry API, plus the two
//! workloads built on it: a bulk time-series exporter writing sorted CSV
//! record files and a live poll loop that keeps a last-known-good metric cache.
//!
//! ## Layers
//!
//! - [`transport`]: HTTP client with retries, exponential backoff, a shared
//!   rate budget and transparent re-authentication.
//! - [`api`] and [`device`]: typed `/devices` and `/load_data` operations.
//! - [`timeseries`]: delta-time decoding and the windowed range fetch that
//!   splits long ranges into bounded, ordered queries.
//! - [`export`]: idempotent merge of fetched batches into per-metric files.
//! - [`poller`]: periodic polling into a [`poller::MetricCache`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chrono::{TimeZone, Utc};
//! use zont_api::prelude::*;
//!
//! # async fn example() -> ZontResult<()> {
//! let config = ZontConfig::from_env()?;
//! let api = ZontApi::new(ZontClient::new(config)?);
//!
//! let plan = WindowPlan::new(
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
//!     Duration::from_secs(31 * 86_400),
//!     Alignment::Month,
//! )?;
//!
//! let mut fetch = api.fetch_range(MetricSet::new(42), plan);
//! let summary = Exporter::new("data").export(&mut fetch).await?;
//! println!("{} windows, completed through {}", summary.windows, summary.completed_through);
//! # Ok(())
//! # }
//! ```
//!
//! A failed export returns [`ZontError::PartialExport`]; everything before
//! its `completed_through` is already merged, so the run can be resumed from
//! there.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod logging;
pub mod poller;
pub mod prelude;
pub mod security;
pub mod timeseries;
pub mod transport;

mod shutdown;

pub use error::{ErrorKind, ZontError, ZontResult};
