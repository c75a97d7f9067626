// printwatch_shared: telemetry types and log parsing shared by the monitor, tests and benches

pub mod extractor;
pub mod status;
pub mod telemetry;
pub mod time;


pub use extractor::{TelemetryExtractor, parse_fragment};
pub use status::PrinterStatus;
pub use telemetry::{Fragment, LogEntry, Position, SpeedFragment, TelemetrySample, TemperatureFragment};
