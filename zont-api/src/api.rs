//! Typed operations on top of a [`Transport`].

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::device::Device;
use crate::error::{ZontError, ZontResult};
use crate::security::redact_pii;
use crate::timeseries::{DeviceSeries, MetricSet, RangeFetch, WindowPlan};
use crate::transport::{ApiRequest, Transport};

/// Data types queried when a caller does not name any.
pub const DEFAULT_DATA_TYPES: [&str; 4] = [
    "z3k_temperature",
    "z3k_heating_circuit",
    "z3k_boiler_adapter",
    "z3k_analog_input",
];

/// One device's answer to `load_data`, without bookkeeping fields.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDataResponse {
    device_id: i64,
    time_truncated: bool,
    data: Map<String, Value>,
}

impl LoadDataResponse {
    /// Build from a single entry of the `responses` array.
    pub fn from_value(value: Value) -> ZontResult<Self> {
        let Value::Object(mut data) = value else {
            return Err(ZontError::serialization("load_data response is not an object"));
        };

        let device_id = data
            .remove("device_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ZontError::serialization("load_data response without device_id"))?;
        let time_truncated = data
            .remove("time_truncated")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        data.remove("ok");
        data.remove("error");
        data.remove("timings");

        Ok(Self {
            device_id,
            time_truncated,
            data,
        })
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Whether the server returned less than the requested range.
    pub fn time_truncated(&self) -> bool {
        self.time_truncated
    }

    /// Per data type subtrees, keyed by data type name.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_value(self) -> Value {
        let mut data = self.data;
        data.insert("device_id".to_string(), json!(self.device_id));
        data.insert("time_truncated".to_string(), json!(self.time_truncated));
        Value::Object(data)
    }
}

/// Zont API operations.
#[derive(Debug, Clone)]
pub struct ZontApi<T> {
    transport: T,
}

impl<T: Transport> ZontApi<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// List devices together with their I/O state.
    ///
    /// Payloads are stripped of personal data before they are kept or logged.
    #[instrument(skip(self))]
    pub async fn devices(&self) -> ZontResult<Vec<Device>> {
        let mut response = self
            .transport
            .execute(ApiRequest::post("/devices", json!({ "load_io": true })))
            .await?;

        let raw = match response.get_mut("devices").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        };

        raw.into_iter()
            .map(|mut item| {
                redact_pii(&mut item);
                debug!(device = %item, "device found");
                Device::from_value(item)
            })
            .collect()
    }

    /// Load series for `[from, to)` of one device.
    ///
    /// The wire format takes an inclusive `maxtime`, so `to - 1s` is sent.
    #[instrument(skip(self, data_types), fields(from = %from, to = %to))]
    pub async fn load_data(
        &self,
        device_id: i64,
        data_types: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ZontResult<LoadDataResponse> {
        let mintime = from.timestamp();
        let maxtime = to.timestamp() - 1;
        if maxtime < mintime {
            return Err(ZontError::validation(format!(
                "load_data range [{from}, {to}) is empty"
            )));
        }

        let data_types: Vec<&str> = if data_types.is_empty() {
            DEFAULT_DATA_TYPES.to_vec()
        } else {
            data_types.iter().map(String::as_str).collect()
        };

        let body = json!({
            "requests": [{
                "device_id": device_id,
                "data_types": data_types,
                "mintime": mintime,
                "maxtime": maxtime,
            }]
        });

        let mut response = self
            .transport
            .execute(ApiRequest::post("/load_data", body))
            .await?;

        let first = match response.get_mut("responses") {
            Some(Value::Array(responses)) if !responses.is_empty() => responses.swap_remove(0),
            _ => {
                return Err(ZontError::NotFound {
                    message: format!("no data found for device {device_id}"),
                })
            }
        };

        if first.get("device_id").and_then(Value::as_i64) != Some(device_id) {
            return Err(ZontError::NotFound {
                message: format!("no data found for device {device_id}"),
            });
        }

        if first.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = first
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("load data failed");
            return Err(ZontError::Api {
                code: code.to_string(),
            });
        }

        LoadDataResponse::from_value(first)
    }
}

impl<T: Transport + Clone> ZontApi<T> {
    /// Lazily fetch `metrics` over every window of `plan`.
    pub fn fetch_range(&self, metrics: MetricSet, plan: WindowPlan) -> RangeFetch<DeviceSeries<T>> {
        RangeFetch::new(DeviceSeries::new(self.clone(), metrics), plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Replays canned responses and records requests.
    struct Canned {
        responses: Mutex<Vec<Value>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn execute(&self, request: ApiRequest) -> ZontResult<Value> {
            self.requests.lock().unwrap().push(request);
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_load_data_request_shape() {
        let api = ZontApi::new(Canned::new(vec![json!({
            "ok": true,
            "responses": [{
                "device_id": 42, "ok": true, "time_truncated": true,
                "z3k_temperature": {},
                "timings": {"z3k_temperature": {"wall": 0.1}}
            }]
        })]));

        let response = api.load_data(42, &[], hour(0), hour(1)).await.unwrap();
        assert!(response.time_truncated());
        assert!(!response.data().contains_key("timings"));

        let requests = api.transport().requests.lock().unwrap();
        let body = requests[0].body().unwrap();
        assert_eq!(requests[0].path(), "/load_data");
        assert_eq!(body["requests"][0]["mintime"], json!(hour(0).timestamp()));
        assert_eq!(body["requests"][0]["maxtime"], json!(hour(1).timestamp() - 1));
        assert_eq!(body["requests"][0]["data_types"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_load_data_wrong_device_is_not_found() {
        let api = ZontApi::new(Canned::new(vec![json!({
            "ok": true,
            "responses": [{"device_id": 7, "ok": true}]
        })]));

        let err = api.load_data(42, &[], hour(0), hour(1)).await.unwrap_err();
        assert!(matches!(err, ZontError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_data_empty_responses() {
        let api = ZontApi::new(Canned::new(vec![json!({"ok": true, "responses": []})]));
        let err = api.load_data(42, &[], hour(0), hour(1)).await.unwrap_err();
        assert!(matches!(err, ZontError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_data_inner_error() {
        let api = ZontApi::new(Canned::new(vec![json!({
            "ok": true,
            "responses": [{"device_id": 42, "ok": false, "error": "bad_data_type"}]
        })]));

        let err = api.load_data(42, &[], hour(0), hour(1)).await.unwrap_err();
        assert!(matches!(err, ZontError::Api { ref code } if code == "bad_data_type"));
    }

    #[tokio::test]
    async fn test_load_data_rejects_empty_range() {
        let api = ZontApi::new(Canned::new(Vec::new()));
        let err = api.load_data(42, &[], hour(1), hour(1)).await.unwrap_err();
        assert!(matches!(err, ZontError::Validation { .. }));
        assert!(api.transport().requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_devices_are_redacted() {
        let api = ZontApi::new(Canned::new(vec![json!({
            "ok": true,
            "devices": [{
                "id": 42, "name": "boiler room", "ip": "10.0.0.1", "last_receive_time": 1000
            }]
        })]));

        let devices = api.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id(), 42);
        assert_eq!(devices[0].raw()["ip"], json!("***"));
    }

    #[tokio::test]
    async fn test_devices_missing_list() {
        let api = ZontApi::new(Canned::new(vec![json!({"ok": true})]));
        assert!(api.devices().await.unwrap().is_empty());
    }
}
