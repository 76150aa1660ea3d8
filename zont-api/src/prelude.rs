//! Prelude for commonly used types and traits in zont-api.

pub use crate::api::{LoadDataResponse, ZontApi};
pub use crate::config::ZontConfig;
pub use crate::device::{Device, Sensor, SensorFamily};
pub use crate::error::{ErrorKind, ZontError, ZontResult};
pub use crate::export::{Exporter, RecordSet, RecordStore, TargetLayout};
pub use crate::logging::setup::{init_logging, LoggingConfig};
pub use crate::poller::{DeviceStateSource, MetricCache, PollExporter, PollSource, PollState};
pub use crate::timeseries::{
    Alignment, ExportBatch, MetricSet, RangeFetch, Sample, TimeWindow, WindowPlan, WindowSource,
};
pub use crate::transport::{RateLimit, Transport, ZontClient};
