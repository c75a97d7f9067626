//! Log-line telemetry extraction.
//!
//! The gateway hands back the machine's serial log as free-form text. Three kinds of lines
//! carry telemetry:
//!
//! - temperature reports: `Recv: T:210.1 /200.0 B:60.2 /60.0 @:128 B@:64`
//! - position reports (`M114`): `X:10.0 Y:5.0 Z:1.0 E:3.2 Count X:800 ...`
//! - speed-factor reports (`M220`): `FR:100%`
//!
//! The `match_*` functions are pure and independent of each other. [`TelemetryExtractor`]
//! layers the stateful rules on top: position and speed reports only become samples when a
//! temperature report was seen earlier in the same cycle.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};

use crate::telemetry::{Fragment, Position, SpeedFragment, TelemetrySample, TemperatureFragment};

/// Nozzle target a position report must be paired with to count.
pub const DEFAULT_NOZZLE_TARGET: f64 = 200.0;

static TEMPERATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Recv:\s*)?T:([\d.]+)\s*/([\d.]+)\s*B:([\d.]+)\s*/([\d.]+)\s*@:(\d+)\s*B@:(\d+)")
        .expect("temperature pattern")
});

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"X:([-\d.]+)\s+Y:([-\d.]+)\s+Z:([-\d.]+)\s+E:([-\d.]+)").expect("position pattern")
});

static SPEED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"FR:([\d.]+)%").expect("speed pattern"));

fn capture<T: FromStr>(caps: &Captures<'_>, index: usize) -> Option<T> {
    caps.get(index)?.as_str().parse().ok()
}

pub fn match_temperature(line: &str) -> Option<TemperatureFragment> {
    let caps = TEMPERATURE.captures(line)?;
    Some(TemperatureFragment {
        nozzle_temp: capture(&caps, 1)?,
        nozzle_target: capture(&caps, 2)?,
        bed_temp: capture(&caps, 3)?,
        bed_target: capture(&caps, 4)?,
        nozzle_pwm: capture(&caps, 5)?,
        bed_pwm: capture(&caps, 6)?,
    })
}

pub fn match_position(line: &str) -> Option<Position> {
    let caps = POSITION.captures(line)?;
    Some(Position {
        x: capture(&caps, 1)?,
        y: capture(&caps, 2)?,
        z: capture(&caps, 3)?,
        e: capture(&caps, 4)?,
    })
}

pub fn match_speed(line: &str) -> Option<SpeedFragment> {
    let caps = SPEED.captures(line)?;
    Some(SpeedFragment {
        percent: capture(&caps, 1)?,
    })
}

/// Classify one log line. Patterns are tried temperature, position, speed; the first match
/// wins. Malformed numbers yield `None`.
pub fn parse_fragment(line: &str) -> Option<Fragment> {
    let line = line.trim();
    if TEMPERATURE.is_match(line) {
        return match_temperature(line).map(Fragment::Temperature);
    }
    if POSITION.is_match(line) {
        return match_position(line).map(Fragment::Position);
    }
    match_speed(line).map(Fragment::Speed)
}

/// The firmware answers a probe move with `X:0 Y:0 Z:5`; it is not a real toolhead position.
pub fn is_probe_artifact(position: &Position) -> bool {
    position.x == 0.0 && position.y == 0.0 && position.z == 5.0
}

/// Stateful extractor for one sampling cycle.
///
/// Holds the last temperature reading so it can be paired with position and speed reports
/// that arrive on later lines.
#[derive(Debug, Clone)]
pub struct TelemetryExtractor {
    required_nozzle_target: f64,
    last_temperature: Option<TemperatureFragment>,
}

impl Default for TelemetryExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_NOZZLE_TARGET)
    }
}

impl TelemetryExtractor {
    pub fn new(required_nozzle_target: f64) -> Self {
        Self {
            required_nozzle_target,
            last_temperature: None,
        }
    }

    pub fn last_temperature(&self) -> Option<&TemperatureFragment> {
        self.last_temperature.as_ref()
    }

    pub fn clear(&mut self) {
        self.last_temperature = None;
    }

    /// Recognise a fragment and apply the pairing rules.
    pub fn extract(&mut self, line: &str) -> Option<Fragment> {
        match parse_fragment(line)? {
            Fragment::Temperature(reading) => {
                self.last_temperature = Some(reading);
                Some(Fragment::Temperature(reading))
            }
            Fragment::Position(position) => {
                if is_probe_artifact(&position) {
                    tracing::debug!("Ignoring probe position report: {}", line.trim());
                    return None;
                }
                let reading = self.last_temperature.as_ref()?;
                if reading.nozzle_target != self.required_nozzle_target {
                    tracing::debug!(
                        "Ignoring position report, nozzle target {:.1} is not {:.1}",
                        reading.nozzle_target,
                        self.required_nozzle_target
                    );
                    return None;
                }
                Some(Fragment::Position(position))
            }
            Fragment::Speed(speed) => {
                self.last_temperature.as_ref()?;
                Some(Fragment::Speed(speed))
            }
        }
    }

    /// Feed one line; returns a sample when a position or speed report pairs with the cached
    /// temperature reading.
    pub fn observe(&mut self, line: &str, filename: &str, now: NaiveDateTime) -> Option<TelemetrySample> {
        let fragment = self.extract(line)?;
        let reading = self.last_temperature?;
        match fragment {
            Fragment::Temperature(_) => None,
            Fragment::Position(position) => {
                Some(TelemetrySample::from_reading(&reading, now, filename).with_position(position))
            }
            Fragment::Speed(speed) => {
                Some(TelemetrySample::from_reading(&reading, now, filename).with_speed_factor(speed.percent))
            }
        }
    }
}
