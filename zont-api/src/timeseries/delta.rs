//! Decoding of the vendor's delta time arrays.
//!
//! A series arrives as `[[t, v], [-d, v], ...]`: a positive head is an
//! absolute UNIX timestamp, a negative head advances the current stamp by
//! `d` seconds and a zero head is ignored.

use serde_json::{Map, Value};
use tracing::debug;

use crate::api::LoadDataResponse;
use crate::error::{ZontError, ZontResult};
use crate::timeseries::Sample;

/// One decoded point of a delta time array.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPoint {
    pub timestamp: i64,
    pub value: Value,
}

/// Convert a delta time array into points with absolute timestamps.
///
/// With `sort` set the result is stable-sorted by timestamp.
pub fn convert_delta_time_array(array: &Value, sort: bool) -> ZontResult<Vec<DeltaPoint>> {
    let elements = array.as_array().ok_or_else(|| {
        ZontError::serialization(format!(
            "delta time array: list expected but found {}",
            type_name(array)
        ))
    })?;

    let mut points = Vec::with_capacity(elements.len());
    let mut current: i64 = 0;

    for element in elements {
        let items = element.as_array().ok_or_else(|| {
            ZontError::serialization(format!(
                "delta time array element: list expected but found {}",
                type_name(element)
            ))
        })?;

        let head = items
            .first()
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or_else(|| {
                ZontError::serialization("delta time array element: missing timestamp")
            })?;

        match head {
            0 => continue,
            stamp if stamp > 0 => current = stamp,
            delta => {
                current = delta
                    .checked_neg()
                    .and_then(|step| current.checked_add(step))
                    .ok_or_else(|| {
                        ZontError::serialization("delta time array: timestamp overflow")
                    })?;
            }
        }

        let value = match items.len() {
            1 => Value::Null,
            2 => items[1].clone(),
            _ => Value::Array(items[1..].to_vec()),
        };
        points.push(DeltaPoint {
            timestamp: current,
            value,
        });
    }

    if sort {
        points.sort_by_key(|p| p.timestamp);
    }
    Ok(points)
}

/// Drop points whose value repeats the previous point's value.
pub fn filter_duplicates(points: &mut Vec<DeltaPoint>) {
    points.dedup_by(|current, previous| current.value == previous.value);
}

/// Flatten every data type of a `load_data` response into samples.
///
/// Numbers become samples as-is, booleans become `0`/`1`; anything else
/// (status lists, strings) has no numeric reading and is skipped.
pub fn extract_samples(
    response: &LoadDataResponse,
    filter_consecutive_duplicates: bool,
) -> ZontResult<Vec<Sample>> {
    let device = response.device_id();
    let mut samples = Vec::new();

    for (data_type, subtree) in response.data() {
        let Some(sensors) = subtree.as_object() else {
            continue;
        };
        match data_type.as_str() {
            "z3k_temperature" => {
                for (sensor_id, series) in sensors {
                    let metric = format!("device_{device}.analog_temperature_sensor_{sensor_id}");
                    push_series(
                        &mut samples,
                        &metric,
                        series,
                        Some("°C"),
                        filter_consecutive_duplicates,
                    )?;
                }
            }
            "z3k_analog_input" => {
                nested(&mut samples, sensors, filter_consecutive_duplicates, |sensor_id, key| {
                    format!("device_{device}.analog_input_{sensor_id}.{key}")
                })?;
            }
            "z3k_boiler_adapter" => {
                nested(&mut samples, sensors, filter_consecutive_duplicates, |sensor_id, key| {
                    format!("device_{device}.boiler_adapter_{sensor_id}.{key}")
                })?;
            }
            "z3k_heating_circuit" => {
                nested(&mut samples, sensors, filter_consecutive_duplicates, |sensor_id, key| {
                    format!("device_{device}.heating_circuit_{sensor_id}.{key}")
                })?;
            }
            other => debug!(data_type = other, "skipping unsupported data type"),
        }
    }

    Ok(samples)
}

fn nested<F>(
    samples: &mut Vec<Sample>,
    sensors: &Map<String, Value>,
    filter_consecutive_duplicates: bool,
    metric_name: F,
) -> ZontResult<()>
where
    F: Fn(&str, &str) -> String,
{
    for (sensor_id, fields) in sensors {
        let Some(fields) = fields.as_object() else {
            continue;
        };
        for (key, series) in fields {
            let metric = metric_name(sensor_id, key);
            let unit = (key == "voltage").then_some("V");
            push_series(samples, &metric, series, unit, filter_consecutive_duplicates)?;
        }
    }
    Ok(())
}

fn push_series(
    samples: &mut Vec<Sample>,
    metric: &str,
    series: &Value,
    unit: Option<&str>,
    filter_consecutive_duplicates: bool,
) -> ZontResult<()> {
    let mut points = convert_delta_time_array(series, true)?;
    if filter_consecutive_duplicates {
        filter_duplicates(&mut points);
    }

    for point in points {
        let Some(value) = numeric(&point.value) else {
            continue;
        };
        let mut sample = Sample::new(point.timestamp, metric, value);
        if let Some(unit) = unit {
            sample = sample.with_unit(unit);
        }
        samples.push(sample);
    }
    Ok(())
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
