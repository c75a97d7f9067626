//! # Monitor Configuration
//!
//! All settings live in one TOML file. Every field has a default, so an empty file is a valid
//! (if not very useful) configuration: with no `[monitor.jobs]` table every job is rejected.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [gateway]
//! base_url = "http://192.168.2.90:1880"
//! api_key = "change-me"
//!
//! [destinations]
//! ledger = "192.168.250.104:5001"
//! store = "192.168.250.104:5004"
//! models = "192.168.250.104:5002"
//!
//! [monitor.jobs]
//! "zdm4ms~4.gco" = "QUADRADO"
//! "zd5b20~1.gco" = "L"
//!
//! [channels]
//! response_timeout_ms = 10000
//! ```
//!
//! `PRINTWATCH_API_KEY` and `PRINTWATCH_GATEWAY_URL` override the gateway settings when set.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Job '{0}' is not in the allowed job list")]
    DisallowedJob(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub destinations: DestinationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub milestones: MilestoneConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// HTTP gateway fronting the machine and every downstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Username sent when subscribing to the machine's log stream.
    #[serde(default = "default_subscriber")]
    pub subscriber: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            subscriber: default_subscriber(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Addresses the gateway forwards store, model and ledger calls to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    #[serde(default = "default_ledger")]
    pub ledger: String,
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default = "default_models")]
    pub models: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
            store: default_store(),
            models: default_models(),
        }
    }
}

/// Job lifecycle and sampling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Allowed job files and the ledger piece type each one produces.
    #[serde(default)]
    pub jobs: HashMap<String, String>,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_awaiting_poll_ms")]
    pub awaiting_poll_ms: u64,
    #[serde(default = "default_active_poll_ms")]
    pub active_poll_ms: u64,
    #[serde(default = "default_paused_poll_ms")]
    pub paused_poll_ms: u64,
    #[serde(default = "default_status_retry_ms")]
    pub status_retry_ms: u64,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_state_log_interval_secs")]
    pub state_log_interval_secs: u64,
    #[serde(default = "default_guard_timeout_ms")]
    pub guard_timeout_ms: u64,
    #[serde(default = "default_worker_join_grace_ms")]
    pub worker_join_grace_ms: u64,
    /// Offset (minutes east of UTC) the naive job start time is read at.
    #[serde(default = "default_start_time_utc_offset_minutes")]
    pub start_time_utc_offset_minutes: i32,
    #[serde(default = "default_required_nozzle_target")]
    pub required_nozzle_target: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
            idle_poll_ms: default_idle_poll_ms(),
            awaiting_poll_ms: default_awaiting_poll_ms(),
            active_poll_ms: default_active_poll_ms(),
            paused_poll_ms: default_paused_poll_ms(),
            status_retry_ms: default_status_retry_ms(),
            sample_interval_ms: default_sample_interval_ms(),
            state_log_interval_secs: default_state_log_interval_secs(),
            guard_timeout_ms: default_guard_timeout_ms(),
            worker_join_grace_ms: default_worker_join_grace_ms(),
            start_time_utc_offset_minutes: default_start_time_utc_offset_minutes(),
            required_nozzle_target: default_required_nozzle_target(),
        }
    }
}

impl MonitorConfig {
    /// Piece type for an allowed job, matched case-insensitively.
    pub fn piece_type(&self, job: &str) -> Option<&str> {
        self.jobs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(job))
            .map(|(_, piece)| piece.as_str())
    }

    pub fn is_allowed(&self, job: &str) -> bool {
        self.piece_type(job).is_some()
    }

    pub fn start_time_offset(&self) -> Result<FixedOffset, ConfigError> {
        let seconds = self.start_time_utc_offset_minutes.checked_mul(60);
        seconds.and_then(FixedOffset::east_opt).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "start_time_utc_offset_minutes {} is out of range",
                self.start_time_utc_offset_minutes
            ))
        })
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }
}

/// Telemetry query channels (`M114` position, `M220` speed).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default = "default_position_command")]
    pub position_command: String,
    #[serde(default = "default_speed_command")]
    pub speed_command: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_inactive_backoff_ms")]
    pub inactive_backoff_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            position_command: default_position_command(),
            speed_command: default_speed_command(),
            tick_interval_ms: default_tick_interval_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            inactive_backoff_ms: default_inactive_backoff_ms(),
        }
    }
}

/// Build heights (mm) at which inference runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MilestoneConfig {
    #[serde(default = "default_quality_check_height")]
    pub quality_check_height: f64,
    #[serde(default = "default_dimension_check_height")]
    pub dimension_check_height: f64,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            quality_check_height: default_quality_check_height(),
            dimension_check_height: default_dimension_check_height(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_base_url() -> String { "http://127.0.0.1:1880".to_string() }
fn default_subscriber() -> String { "printwatch".to_string() }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_ledger() -> String { "127.0.0.1:5001".to_string() }
fn default_store() -> String { "127.0.0.1:5004".to_string() }
fn default_models() -> String { "127.0.0.1:5002".to_string() }
fn default_idle_poll_ms() -> u64 { 5_000 }
fn default_awaiting_poll_ms() -> u64 { 2_000 }
fn default_active_poll_ms() -> u64 { 5_000 }
fn default_paused_poll_ms() -> u64 { 2_000 }
fn default_status_retry_ms() -> u64 { 2_000 }
fn default_sample_interval_ms() -> u64 { 5_000 }
fn default_state_log_interval_secs() -> u64 { 60 }
fn default_guard_timeout_ms() -> u64 { 5_000 }
fn default_worker_join_grace_ms() -> u64 { 2_000 }
fn default_start_time_utc_offset_minutes() -> i32 { 60 }
fn default_required_nozzle_target() -> f64 { 200.0 }
fn default_position_command() -> String { "M114".to_string() }
fn default_speed_command() -> String { "M220".to_string() }
fn default_tick_interval_ms() -> u64 { 500 }
fn default_response_timeout_ms() -> u64 { 10_000 }
fn default_inactive_backoff_ms() -> u64 { 1_000 }
fn default_quality_check_height() -> f64 { 1.0 }
fn default_dimension_check_height() -> f64 { 4.0 }
fn default_bind() -> String { "0.0.0.0:5000".to_string() }

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PRINTWATCH_*` overrides from `lookup` (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("PRINTWATCH_API_KEY") {
            self.gateway.api_key = key;
        }
        if let Some(url) = lookup("PRINTWATCH_GATEWAY_URL") {
            self.gateway.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("gateway.base_url cannot be empty".to_string()));
        }
        if self.channels.position_command.trim().is_empty() || self.channels.speed_command.trim().is_empty() {
            return Err(ConfigError::Invalid("channel commands cannot be empty".to_string()));
        }
        let timings = [
            ("monitor.idle_poll_ms", self.monitor.idle_poll_ms),
            ("monitor.awaiting_poll_ms", self.monitor.awaiting_poll_ms),
            ("monitor.active_poll_ms", self.monitor.active_poll_ms),
            ("monitor.paused_poll_ms", self.monitor.paused_poll_ms),
            ("monitor.sample_interval_ms", self.monitor.sample_interval_ms),
            ("monitor.guard_timeout_ms", self.monitor.guard_timeout_ms),
            ("channels.tick_interval_ms", self.channels.tick_interval_ms),
            ("channels.response_timeout_ms", self.channels.response_timeout_ms),
            ("gateway.request_timeout_ms", self.gateway.request_timeout_ms),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        self.monitor.start_time_offset()?;
        Ok(())
    }
}

/// Load configuration from `path`, then apply environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
