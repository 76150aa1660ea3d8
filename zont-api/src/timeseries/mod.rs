//! Time-series acquisition: samples, delta time arrays and the windowing engine.
//!
//! [`WindowPlan`] splits a range into API-legal [`TimeWindow`]s and
//! [`RangeFetch`] walks them one at a time, producing [`ExportBatch`]es in
//! ascending time order.

mod delta;
mod fetch;
mod sample;
mod window;

pub use delta::{convert_delta_time_array, extract_samples, filter_duplicates, DeltaPoint};
pub use fetch::{DeviceSeries, ExportBatch, MetricSet, RangeFetch, WindowData, WindowSource};
pub use sample::Sample;
pub use window::{Alignment, TimeWindow, WindowPlan};
