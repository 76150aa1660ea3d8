//! Device model built from the `/devices` payload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ZontError, ZontResult};

/// Sensor families listed under a device's `z3k_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    AnalogInputs,
    AnalogTemperatureSensors,
    BoilerAdapters,
    HeatingCircuits,
    IoExtensions,
    Radiosensors,
    Radiosensors433,
    WiredTemperatureSensors,
}

impl SensorFamily {
    pub const ALL: [SensorFamily; 8] = [
        SensorFamily::AnalogInputs,
        SensorFamily::AnalogTemperatureSensors,
        SensorFamily::BoilerAdapters,
        SensorFamily::HeatingCircuits,
        SensorFamily::IoExtensions,
        SensorFamily::Radiosensors,
        SensorFamily::Radiosensors433,
        SensorFamily::WiredTemperatureSensors,
    ];

    /// Key of this family in `z3k_config`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorFamily::AnalogInputs => "analog_inputs",
            SensorFamily::AnalogTemperatureSensors => "analog_temperature_sensors",
            SensorFamily::BoilerAdapters => "boiler_adapters",
            SensorFamily::HeatingCircuits => "heating_circuits",
            SensorFamily::IoExtensions => "io_extensions",
            SensorFamily::Radiosensors => "radiosensors",
            SensorFamily::Radiosensors433 => "radiosensors433",
            SensorFamily::WiredTemperatureSensors => "wired_temperature_sensors",
        }
    }

    /// Descriptive fields copied into [`Sensor::details`].
    fn detail_keys(&self) -> &'static [&'static str] {
        match self {
            SensorFamily::AnalogInputs => &["sensor_type"],
            SensorFamily::AnalogTemperatureSensors => &["type"],
            SensorFamily::BoilerAdapters => &["adapter_type", "type", "boiler_model"],
            _ => &[],
        }
    }
}

/// A sensor configured on a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub device_id: i64,
    pub id: i64,
    pub family: SensorFamily,
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A Zont controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    id: i64,
    name: String,
    last_receive_time: Option<DateTime<Utc>>,
    last_receive_time_relative: Option<i64>,
    raw: Value,
}

impl Device {
    /// Build from one entry of the `devices` list.
    pub fn from_value(raw: Value) -> ZontResult<Self> {
        let id = raw
            .get("id")
            .and_then(as_i64)
            .ok_or_else(|| ZontError::serialization("device must have an ID"))?;
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ZontError::serialization("device must have a name"))?
            .to_string();

        Ok(Self {
            id,
            name,
            last_receive_time: raw
                .get("last_receive_time")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            last_receive_time_relative: raw
                .get("last_receive_time_relative")
                .and_then(Value::as_i64),
            raw,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the server last heard from the device.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_receive_time
    }

    /// Seconds since the server last heard from the device.
    pub fn last_seen_relative(&self) -> Option<i64> {
        self.last_receive_time_relative
    }

    /// The (PII-redacted) payload this device was built from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Sensors of one family; empty if the device has none configured.
    pub fn sensors(&self, family: SensorFamily) -> Vec<Sensor> {
        self.config_family(family)
            .iter()
            .filter_map(|entry| {
                let id = entry.get("id").and_then(as_i64)?;
                let details = family
                    .detail_keys()
                    .iter()
                    .filter_map(|key| entry.get(*key).map(|v| (key.to_string(), v.clone())))
                    .collect();
                Some(Sensor {
                    device_id: self.id,
                    id,
                    family,
                    name: entry.get("name").and_then(Value::as_str).map(str::to_string),
                    details,
                })
            })
            .collect()
    }

    pub fn analog_inputs(&self) -> Vec<Sensor> {
        self.sensors(SensorFamily::AnalogInputs)
    }

    pub fn analog_temperature_sensors(&self) -> Vec<Sensor> {
        self.sensors(SensorFamily::AnalogTemperatureSensors)
    }

    pub fn boiler_adapters(&self) -> Vec<Sensor> {
        self.sensors(SensorFamily::BoilerAdapters)
    }

    pub fn heating_circuits(&self) -> Vec<Sensor> {
        self.sensors(SensorFamily::HeatingCircuits)
    }

    /// Look a sensor name up across every family.
    pub fn sensor_name(&self, sensor_id: i64) -> Option<&str> {
        SensorFamily::ALL.iter().find_map(|family| {
            self.config_family(*family)
                .iter()
                .find(|entry| entry.get("id").and_then(as_i64) == Some(sensor_id))
                .and_then(|entry| entry.get("name"))
                .and_then(Value::as_str)
        })
    }

    /// Current readings keyed by sensor ID (`io."z3k-state"`).
    pub fn z3k_state(&self) -> Option<&Map<String, Value>> {
        self.raw
            .get("io")
            .and_then(|io| io.get("z3k-state"))
            .and_then(Value::as_object)
    }

    fn config_family(&self, family: SensorFamily) -> &[Value] {
        self.raw
            .get("z3k_config")
            .and_then(|config| config.get(family.as_str()))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.name, self.id)
    }
}

/// Sensor IDs show up both as numbers and as numeric strings.
fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> Device {
        Device::from_value(json!({
            "id": 42,
            "name": "my_device_42",
            "last_receive_time": 1000,
            "last_receive_time_relative": 12,
            "z3k_config": {
                "analog_inputs": [{"id": 4545, "name": "Power", "sensor_type": "voltage"}],
                "analog_temperature_sensors": [{"id": 4242, "name": "Hall", "type": "ntc10"}],
                "boiler_adapters": [{
                    "id": "4444", "name": "Boiler", "adapter_type": "ot", "boiler_model": "x"
                }],
                "radiosensors": [null, {"id": 77, "name": "Garage"}]
            },
            "io": {"z3k-state": {"4545": {"voltage": 23.8}}}
        }))
        .unwrap()
    }

    #[test]
    fn test_requires_id_and_name() {
        assert!(Device::from_value(json!({"name": "x"})).is_err());
        assert!(Device::from_value(json!({"id": 1})).is_err());
    }

    #[test]
    fn test_device_fields() {
        let device = device();
        assert_eq!(device.id(), 42);
        assert_eq!(device.to_string(), "my_device_42 (id=42)");
        assert_eq!(device.last_seen().map(|t| t.timestamp()), Some(1000));
        assert_eq!(device.last_seen_relative(), Some(12));
    }

    #[test]
    fn test_sensor_listing() {
        let device = device();

        let inputs = device.analog_inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].id, 4545);
        assert_eq!(inputs[0].details["sensor_type"], json!("voltage"));

        let adapters = device.boiler_adapters();
        assert_eq!(adapters[0].id, 4444);
        assert_eq!(adapters[0].details.len(), 2);

        assert!(device.heating_circuits().is_empty());
    }

    #[test]
    fn test_sensor_name_searches_all_families() {
        let device = device();
        assert_eq!(device.sensor_name(4242), Some("Hall"));
        assert_eq!(device.sensor_name(77), Some("Garage"));
        assert_eq!(device.sensor_name(1), None);
    }

    #[test]
    fn test_z3k_state() {
        let device = device();
        let state = device.z3k_state().unwrap();
        assert_eq!(state["4545"]["voltage"], json!(23.8));
    }

    #[test]
    fn test_sensor_serializes_flat() {
        let sensor = &device().analog_temperature_sensors()[0];
        let value = serde_json::to_value(sensor).unwrap();
        assert_eq!(value["family"], json!("analog_temperature_sensors"));
        assert_eq!(value["type"], json!("ntc10"));
    }
}
