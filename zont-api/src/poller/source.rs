use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::ZontApi;
use crate::device::Device;
use crate::error::{ZontError, ZontResult};
use crate::transport::Transport;

/// Identity of one cached value: gauge name plus its labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub device_id: i64,
    pub sensor_id: String,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, device_id: i64, sensor_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id,
            sensor_id: sensor_id.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{device_id=\"{}\",sensor_id=\"{}\"}}",
            self.name, self.device_id, self.sensor_id
        )
    }
}

/// A freshly fetched value.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub key: MetricKey,
    pub value: f64,
}

impl Reading {
    pub fn new(key: MetricKey, value: f64) -> Self {
        Self { key, value }
    }
}

/// A group of metrics fetched together on every poll tick.
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn poll(&self) -> ZontResult<Vec<Reading>>;
}

/// Name and help text of a gauge produced by [`DeviceStateSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaugeSpec {
    pub name: &'static str,
    pub help: &'static str,
}

pub const INPUT_VOLTAGE: GaugeSpec = GaugeSpec {
    name: "zont_input_voltage",
    help: "Input voltage",
};
pub const INDOOR_AIR_TEMP: GaugeSpec = GaugeSpec {
    name: "zont_indoor_air_temp",
    help: "Indoor air temperature",
};
pub const BOILER_FAILED: GaugeSpec = GaugeSpec {
    name: "zont_boiler_failed",
    help: "Boiler failure status",
};
pub const BOILER_ERROR: GaugeSpec = GaugeSpec {
    name: "zont_boiler_error",
    help: "Latest error code",
};

/// Boiler adapter `ot` fields and the gauges they feed.
const BOILER_FIELDS: [(&str, GaugeSpec); 6] = [
    (
        "ot",
        GaugeSpec {
            name: "zont_boiler_outdoor_air_temp",
            help: "Outdoor air temperature",
        },
    ),
    (
        "cs",
        GaugeSpec {
            name: "zont_boiler_htf_design_temp",
            help: "Heat-transfer fluid design temperature",
        },
    ),
    (
        "bt",
        GaugeSpec {
            name: "zont_boiler_htf_actual_temp",
            help: "Heat-transfer fluid actual temperature",
        },
    ),
    (
        "ds",
        GaugeSpec {
            name: "zont_boiler_dhw_design_temp",
            help: "Domestic hot water design temperature",
        },
    ),
    (
        "dt",
        GaugeSpec {
            name: "zont_boiler_dhw_actual_temp",
            help: "Domestic hot water actual temperature",
        },
    ),
    (
        "rml",
        GaugeSpec {
            name: "zont_boiler_rml",
            help: "Burner modulation level",
        },
    ),
];

/// Every gauge [`DeviceStateSource`] can emit.
pub fn device_gauges() -> Vec<GaugeSpec> {
    let mut gauges = vec![INPUT_VOLTAGE, INDOOR_AIR_TEMP];
    gauges.extend(BOILER_FIELDS.iter().map(|(_, spec)| *spec));
    gauges.push(BOILER_FAILED);
    gauges.push(BOILER_ERROR);
    gauges
}

/// Current device state, read from one batched `/devices` request.
pub struct DeviceStateSource<T> {
    api: ZontApi<T>,
    device_id: Option<i64>,
}

impl<T: Transport> DeviceStateSource<T> {
    /// Poll every device on the account.
    pub fn new(api: ZontApi<T>) -> Self {
        Self {
            api,
            device_id: None,
        }
    }

    /// Poll only the given device.
    pub fn for_device(api: ZontApi<T>, device_id: i64) -> Self {
        Self {
            api,
            device_id: Some(device_id),
        }
    }
}

#[async_trait]
impl<T: Transport> PollSource for DeviceStateSource<T> {
    fn name(&self) -> &str {
        "device-state"
    }

    async fn poll(&self) -> ZontResult<Vec<Reading>> {
        let devices = self.api.devices().await?;

        let selected: Vec<&Device> = devices
            .iter()
            .filter(|d| self.device_id.map_or(true, |id| d.id() == id))
            .collect();
        if let (Some(id), true) = (self.device_id, selected.is_empty()) {
            return Err(ZontError::NotFound {
                message: format!("device {id} not found"),
            });
        }

        let mut readings = Vec::new();
        for device in selected {
            readings.extend(device_readings(device));
        }
        Ok(readings)
    }
}

/// Derive gauge readings from a device's `z3k-state`.
///
/// Sensors without state (or without a numeric field) are skipped with a
/// warning so the rest of the device still updates.
pub fn device_readings(device: &Device) -> Vec<Reading> {
    let Some(state) = device.z3k_state() else {
        warn!(device = %device, "z3k-state subtree not found");
        return Vec::new();
    };

    let mut readings = Vec::new();

    for sensor in device.analog_inputs() {
        if let Some(value) = sensor_field(state, device, sensor.id, "voltage") {
            readings.push(reading(INPUT_VOLTAGE, device, sensor.id, value));
        }
    }

    for sensor in device.analog_temperature_sensors() {
        if let Some(value) = sensor_field(state, device, sensor.id, "curr_temp") {
            readings.push(reading(INDOOR_AIR_TEMP, device, sensor.id, value));
        }
    }

    for adapter in device.boiler_adapters() {
        let Some(ot) = state
            .get(&adapter.id.to_string())
            .and_then(|s| s.get("ot"))
            .and_then(Value::as_object)
        else {
            warn!(device = %device, sensor_id = adapter.id, "boiler adapter state not found");
            continue;
        };

        for (field, spec) in BOILER_FIELDS {
            match ot.get(field).and_then(numeric) {
                Some(value) => readings.push(reading(spec, device, adapter.id, value)),
                None => debug!(device = %device, sensor_id = adapter.id, field, "field missing"),
            }
        }

        let failed = ot
            .get("s")
            .and_then(Value::as_array)
            .is_some_and(|status| status.iter().any(|s| s.as_str() == Some("f")));
        let error_code = if failed {
            ot.get("ff")
                .and_then(|ff| ff.get("c"))
                .and_then(numeric)
                .unwrap_or(0.0)
        } else {
            0.0
        };
        if failed {
            warn!(
                device = %device,
                sensor_id = adapter.id,
                "boiler error detected: E{:02}",
                error_code as i64
            );
        }
        readings.push(reading(
            BOILER_FAILED,
            device,
            adapter.id,
            if failed { 1.0 } else { 0.0 },
        ));
        readings.push(reading(BOILER_ERROR, device, adapter.id, error_code));
    }

    readings
}

fn sensor_field(
    state: &Map<String, Value>,
    device: &Device,
    sensor_id: i64,
    field: &str,
) -> Option<f64> {
    let value = state
        .get(&sensor_id.to_string())
        .and_then(|s| s.get(field))
        .and_then(numeric);
    if value.is_none() {
        warn!(device = %device, sensor_id, field, "sensor state not found");
    }
    value
}

fn reading(spec: GaugeSpec, device: &Device, sensor_id: i64, value: f64) -> Reading {
    Reading::new(
        MetricKey::new(spec.name, device.id(), sensor_id.to_string()),
        value,
    )
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
