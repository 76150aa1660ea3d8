use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::api::ZontApi;
use crate::error::{ZontError, ZontResult};
use crate::shutdown::stop_requested;
use crate::timeseries::{extract_samples, Sample, TimeWindow, WindowPlan};
use crate::transport::Transport;

/// Samples returned for one window, plus whether the server cut the answer short.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowData {
    pub samples: Vec<Sample>,
    pub truncated: bool,
}

/// Fetches the samples of one window.
#[async_trait]
pub trait WindowSource: Send + Sync {
    async fn fetch_window(&self, window: &TimeWindow) -> ZontResult<WindowData>;
}

/// Which series of which device to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSet {
    device_id: i64,
    data_types: Vec<String>,
    filter_duplicates: bool,
}

impl MetricSet {
    /// All default z3k data types of a device.
    pub fn new(device_id: i64) -> Self {
        Self {
            device_id,
            data_types: Vec::new(),
            filter_duplicates: false,
        }
    }

    pub fn with_data_types<I, S>(mut self, data_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_types = data_types.into_iter().map(Into::into).collect();
        self
    }

    /// Drop consecutive repeated values before they reach the merge stage.
    pub fn with_filter_duplicates(mut self, enabled: bool) -> Self {
        self.filter_duplicates = enabled;
        self
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn data_types(&self) -> &[String] {
        &self.data_types
    }

    pub fn filter_duplicates(&self) -> bool {
        self.filter_duplicates
    }
}

/// [`WindowSource`] backed by `load_data` calls for one [`MetricSet`].
pub struct DeviceSeries<T> {
    api: ZontApi<T>,
    metrics: MetricSet,
}

impl<T> DeviceSeries<T> {
    pub fn new(api: ZontApi<T>, metrics: MetricSet) -> Self {
        Self { api, metrics }
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }
}

#[async_trait]
impl<T: Transport> WindowSource for DeviceSeries<T> {
    async fn fetch_window(&self, window: &TimeWindow) -> ZontResult<WindowData> {
        let response = self
            .api
            .load_data(
                self.metrics.device_id,
                &self.metrics.data_types,
                window.from(),
                window.to(),
            )
            .await?;

        Ok(WindowData {
            samples: extract_samples(&response, self.metrics.filter_duplicates)?,
            truncated: response.time_truncated(),
        })
    }
}

/// Samples of one window, ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBatch {
    window: TimeWindow,
    samples: Vec<Sample>,
}

impl ExportBatch {
    pub fn new(window: TimeWindow, samples: Vec<Sample>) -> Self {
        Self { window, samples }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Lazy, window-by-window fetch of a time range.
///
/// Exactly one window is in flight at a time and windows are requested in
/// ascending order. When a window fails the sequence ends with
/// [`ZontError::PartialExport`], whose `completed_through` is the end of the
/// last window yielded; a new fetch starting there picks up exactly the rest.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use zont_api::prelude::*;
///
/// # async fn example() -> ZontResult<()> {
/// let api = ZontApi::new(ZontClient::new(ZontConfig::from_env()?)?);
/// let plan = WindowPlan::new(
///     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
///     Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
///     Duration::from_secs(86_400),
///     Alignment::Day,
/// )?;
///
/// let mut fetch = api.fetch_range(MetricSet::new(42), plan);
/// while let Some(batch) = fetch.next_batch().await {
///     let batch = batch?;
///     println!("{}: {} samples", batch.window(), batch.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct RangeFetch<S> {
    source: S,
    plan: WindowPlan,
    pending: Vec<TimeWindow>,
    completed_through: DateTime<Utc>,
    cancel: Option<watch::Receiver<bool>>,
    finished: bool,
}

impl<S: WindowSource> RangeFetch<S> {
    pub fn new(source: S, plan: WindowPlan) -> Self {
        Self {
            completed_through: plan.cursor(),
            source,
            plan,
            pending: Vec::new(),
            cancel: None,
            finished: false,
        }
    }

    /// Stop between windows, or abort the in-flight window, once `signal` turns true.
    pub fn with_cancellation(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// End of the last window yielded (or the range start).
    pub fn completed_through(&self) -> DateTime<Utc> {
        self.completed_through
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the next window. `None` once the range is exhausted or after an error.
    #[instrument(skip(self))]
    pub async fn next_batch(&mut self) -> Option<ZontResult<ExportBatch>> {
        if self.finished {
            return None;
        }

        loop {
            let Some(window) = self.pending.pop().or_else(|| self.plan.next()) else {
                self.finished = true;
                return None;
            };

            let result = match self.cancel.clone() {
                Some(mut signal) => {
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut signal) => Err(ZontError::Cancelled),
                        result = self.source.fetch_window(&window) => result,
                    }
                }
                None => self.source.fetch_window(&window).await,
            };

            match result {
                Ok(data) if data.truncated => match window.bisect() {
                    Some((first, second)) => {
                        debug!(%window, "response truncated, splitting window");
                        self.pending.push(second);
                        self.pending.push(first);
                    }
                    None => {
                        let err = ZontError::Api {
                            code: "time_truncated".to_string(),
                        };
                        return Some(Err(self.fail(window, err)));
                    }
                },
                Ok(data) => {
                    let mut samples: Vec<Sample> = data
                        .samples
                        .into_iter()
                        .filter(|s| window.contains_timestamp(s.timestamp))
                        .collect();
                    samples.sort_by_key(|s| s.timestamp);

                    self.completed_through = window.to();
                    debug!(%window, samples = samples.len(), "window fetched");
                    return Some(Ok(ExportBatch::new(window, samples)));
                }
                Err(err) => return Some(Err(self.fail(window, err))),
            }
        }
    }

    /// Drain every window into memory.
    pub async fn collect_batches(mut self) -> ZontResult<Vec<ExportBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await {
            batches.push(batch?);
        }
        Ok(batches)
    }

    fn fail(&mut self, window: TimeWindow, source: ZontError) -> ZontError {
        self.finished = true;
        warn!(
            %window,
            completed_through = %self.completed_through,
            error = %source,
            "range fetch stopped"
        );
        ZontError::PartialExport {
            completed_through: self.completed_through,
            failed_window: window,
            source: Box::new(source),
        }
    }
}
