// src/print_job.rs - Start requests and the monitoring session they open
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control::JobIdentity;

/// Ledger key of the printed piece.
///
/// The HMI sends either a number or a string; the ledger receives it back in the same JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetId {
    Number(i64),
    Text(String),
}

impl AssetId {
    pub fn is_blank(&self) -> bool {
        matches!(self, AssetId::Text(text) if text.trim().is_empty())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Number(n) => write!(f, "{n}"),
            AssetId::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for AssetId {
    fn from(n: i64) -> Self {
        AssetId::Number(n)
    }
}

impl From<&str> for AssetId {
    fn from(text: &str) -> Self {
        AssetId::Text(text.to_string())
    }
}

impl From<String> for AssetId {
    fn from(text: String) -> Self {
        AssetId::Text(text)
    }
}

fn default_speed_factor() -> f64 {
    100.0
}

/// Body of `POST /api/v1/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub filename: String,
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,
    #[serde(rename = "ip_printer")]
    pub printer: String,
    #[serde(rename = "id")]
    pub asset_id: AssetId,
}

impl StartRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.filename.trim().is_empty() {
            return Err("filename cannot be empty".to_string());
        }
        if self.filename.chars().any(char::is_whitespace) {
            return Err(format!("filename '{}' contains whitespace", self.filename));
        }
        if self.printer.trim().is_empty() {
            return Err("ip_printer cannot be empty".to_string());
        }
        if self.asset_id.is_blank() {
            return Err("id cannot be empty".to_string());
        }
        if !self.speed_factor.is_finite() || self.speed_factor <= 0.0 {
            return Err(format!("speed_factor {} must be positive", self.speed_factor));
        }
        Ok(())
    }

    /// Select the file on the SD card, start it, and apply the feed-rate override.
    pub fn start_sequence(&self) -> Vec<String> {
        vec![
            "M27 S0".to_string(),
            format!("M23 {}", self.filename),
            "M24".to_string(),
            format!("M220 S{}", self.speed_factor),
        ]
    }

    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            filename: self.filename.clone(),
            asset_id: self.asset_id.clone(),
            printer: self.printer.clone(),
        }
    }
}

/// One accepted start request, from acceptance until completion or abandonment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSession {
    pub id: Uuid,
    pub filename: String,
    pub printer: String,
    pub asset_id: AssetId,
    pub piece_type: String,
    pub accepted_at: DateTime<Utc>,
}

impl JobSession {
    pub fn new(request: &StartRequest, piece_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: request.filename.clone(),
            printer: request.printer.clone(),
            asset_id: request.asset_id.clone(),
            piece_type: piece_type.to_string(),
            accepted_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            filename: self.filename.clone(),
            asset_id: self.asset_id.clone(),
            printer: self.printer.clone(),
        }
    }
}
