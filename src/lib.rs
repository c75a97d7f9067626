// printwatch: monitors a print job on a networked machine and feeds telemetry to quality models
pub mod channel;
pub mod config;
pub mod control;
pub mod gateway;
pub mod milestone;
pub mod print_job;
pub mod printer;
pub mod sampler;
pub mod supervisor;
pub mod web;

pub use config::{Config, ConfigError, load_config};
pub use gateway::{Gateways, GatewayError};
pub use print_job::{AssetId, JobSession, StartRequest};
pub use printer::{MonitorError, MonitorPhase, PrinterStateMachine};
