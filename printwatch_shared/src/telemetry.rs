//! Telemetry types exchanged between the extractor, the telemetry store and the asset ledger.
//!
//! A [`TelemetrySample`] is always built from a temperature report paired with either a
//! position report (`M114`) or a speed-factor report (`M220`). On the wire it is a flat JSON
//! object; see [`SampleRecord`] for the exact field names.

use chrono::NaiveDateTime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Temperature report (`T:210.1/200.0 B:60.2/60.0 @:128 B@:64`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureFragment {
    pub nozzle_temp: f64,
    pub nozzle_target: f64,
    pub bed_temp: f64,
    pub bed_target: f64,
    pub nozzle_pwm: u32,
    pub bed_pwm: u32,
}

/// Toolhead position, as reported by `M114` (`X:10.0 Y:5.0 Z:1.0 E:3.2`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

/// Feed-rate override, as reported by `M220` (`FR:100%`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFragment {
    pub percent: f64,
}

/// A structured reading recognised inside one log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment {
    Temperature(TemperatureFragment),
    Position(Position),
    Speed(SpeedFragment),
}

/// One persisted telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SampleRecord", from = "SampleRecord")]
pub struct TelemetrySample {
    pub timestamp: NaiveDateTime,
    pub nozzle_temp: f64,
    pub nozzle_target: f64,
    pub nozzle_delta: f64,
    pub nozzle_pwm: u32,
    pub bed_temp: f64,
    pub bed_target: f64,
    pub bed_delta: f64,
    pub bed_pwm: u32,
    pub position: Option<Position>,
    pub speed_factor: Option<f64>,
    pub filename: String,
}

impl TelemetrySample {
    /// Build a sample carrying only the temperature part of a reading.
    pub fn from_reading(reading: &TemperatureFragment, timestamp: NaiveDateTime, filename: &str) -> Self {
        Self {
            timestamp,
            nozzle_temp: reading.nozzle_temp,
            nozzle_target: reading.nozzle_target,
            nozzle_delta: reading.nozzle_temp - reading.nozzle_target,
            nozzle_pwm: reading.nozzle_pwm,
            bed_temp: reading.bed_temp,
            bed_target: reading.bed_target,
            bed_delta: reading.bed_temp - reading.bed_target,
            bed_pwm: reading.bed_pwm,
            position: None,
            speed_factor: None,
            filename: filename.to_string(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_speed_factor(mut self, percent: f64) -> Self {
        self.speed_factor = Some(percent);
        self
    }

    /// Build height (Z) of the sample, if it came from a position report.
    pub fn height(&self) -> Option<f64> {
        self.position.map(|p| p.z)
    }
}

/// Flat wire representation shared by the telemetry store and the asset ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    #[serde(with = "crate::time::naive_seconds")]
    pub timestamp: NaiveDateTime,
    pub temp_nozzle: f64,
    pub temp_target_nozzle: f64,
    pub temp_delta_nozzle: f64,
    #[serde(deserialize_with = "pwm_value")]
    pub pwm_nozzle: u32,
    pub temp_bed: f64,
    pub temp_target_bed: f64,
    pub temp_delta_bed: f64,
    #[serde(deserialize_with = "pwm_value")]
    pub pwm_bed: u32,
    #[serde(rename = "X")]
    pub x: Option<f64>,
    #[serde(rename = "Y")]
    pub y: Option<f64>,
    #[serde(rename = "Z")]
    pub z: Option<f64>,
    #[serde(rename = "E")]
    pub e: Option<f64>,
    pub speed_factor: Option<f64>,
    pub filename: String,
}

impl From<TelemetrySample> for SampleRecord {
    fn from(sample: TelemetrySample) -> Self {
        let position = sample.position;
        Self {
            timestamp: sample.timestamp,
            temp_nozzle: sample.nozzle_temp,
            temp_target_nozzle: sample.nozzle_target,
            temp_delta_nozzle: sample.nozzle_delta,
            pwm_nozzle: sample.nozzle_pwm,
            temp_bed: sample.bed_temp,
            temp_target_bed: sample.bed_target,
            temp_delta_bed: sample.bed_delta,
            pwm_bed: sample.bed_pwm,
            x: position.map(|p| p.x),
            y: position.map(|p| p.y),
            z: position.map(|p| p.z),
            e: position.map(|p| p.e),
            speed_factor: sample.speed_factor,
            filename: sample.filename,
        }
    }
}

impl From<SampleRecord> for TelemetrySample {
    fn from(record: SampleRecord) -> Self {
        // A partial position is not a position.
        let position = match (record.x, record.y, record.z, record.e) {
            (Some(x), Some(y), Some(z), Some(e)) => Some(Position { x, y, z, e }),
            _ => None,
        };
        Self {
            timestamp: record.timestamp,
            nozzle_temp: record.temp_nozzle,
            nozzle_target: record.temp_target_nozzle,
            nozzle_delta: record.temp_delta_nozzle,
            nozzle_pwm: record.pwm_nozzle,
            bed_temp: record.temp_bed,
            bed_target: record.temp_target_bed,
            bed_delta: record.temp_delta_bed,
            bed_pwm: record.pwm_bed,
            position,
            speed_factor: record.speed_factor,
            filename: record.filename,
        }
    }
}

/// The store hands PWM duty values back as floats.
fn pwm_value<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && (0.0..=u32::MAX as f64).contains(&value) {
        Ok(value.round() as u32)
    } else {
        Err(D::Error::custom(format!("invalid PWM value {value}")))
    }
}

/// One entry of the machine log as returned by the gateway:
/// `{"ts": "...Z", "msg": {"current": {"logs": [...]}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub msg: LogMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub current: LogCurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogCurrent {
    #[serde(default)]
    pub logs: Vec<String>,
}

impl LogEntry {
    pub fn new(ts: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            ts: ts.into(),
            msg: LogMessage {
                current: LogCurrent { logs: lines },
            },
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.msg.current.logs
    }
}
