//! Collaborators reached through the HTTP middleware.
//!
//! The monitor only talks to the outside world through the four traits in this module. The
//! production implementation is [`HttpGateway`]; tests plug in in-memory fakes.

pub mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use printwatch_shared::{LogEntry, PrinterStatus, TelemetrySample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::print_job::AssetId;
pub use http::HttpGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gateway returned {status} for {path}: {body}")]
    Status { path: String, status: u16, body: String },
    #[error("Unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("Expected 3 or 7 dimensions, got {0}")]
    InvalidDimensions(usize),
}

/// Classifier outcome for the first-layer quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityVerdict {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOK")]
    Nok,
}

impl QualityVerdict {
    /// Value written to the ledger's state property.
    pub fn ledger_state(&self) -> &'static str {
        match self {
            QualityVerdict::Ok => "predicted OK",
            QualityVerdict::Nok => "predicted NOK",
        }
    }
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityVerdict::Ok => write!(f, "OK"),
            QualityVerdict::Nok => write!(f, "NOK"),
        }
    }
}

/// Dimension update for the ledger. Field names are the ledger's.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DimensionReport {
    Extended {
        comprimento: f64,
        largura: f64,
        comprimento_ext1: f64,
        comprimento_ext2: f64,
        largura_ext1: f64,
        largura_ext2: f64,
        altura: f64,
    },
    Basic {
        comprimento: f64,
        largura: f64,
        altura: f64,
    },
}

impl DimensionReport {
    pub fn from_predictions(values: &[f64]) -> Result<Self, GatewayError> {
        match *values {
            [comprimento, largura, comprimento_ext1, comprimento_ext2, largura_ext1, largura_ext2, altura] => {
                Ok(DimensionReport::Extended {
                    comprimento,
                    largura,
                    comprimento_ext1,
                    comprimento_ext2,
                    largura_ext1,
                    largura_ext2,
                    altura,
                })
            }
            [comprimento, largura, altura] => Ok(DimensionReport::Basic { comprimento, largura, altura }),
            _ => Err(GatewayError::InvalidDimensions(values.len())),
        }
    }
}

/// Status, commands and log stream of one machine.
#[async_trait]
pub trait PrinterLink: Send + Sync {
    async fn status(&self, printer: &str) -> Result<PrinterStatus, GatewayError>;
    async fn send_command(&self, printer: &str, command: &str) -> Result<(), GatewayError>;
    async fn subscribe(&self, printer: &str) -> Result<(), GatewayError>;
    async fn fetch_logs(&self, printer: &str, filename: &str) -> Result<Vec<LogEntry>, GatewayError>;
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append(&self, sample: &TelemetrySample) -> Result<(), GatewayError>;
    /// Samples recorded for `filename` since `start_time`.
    async fn query(&self, start_time: NaiveDateTime, filename: &str) -> Result<Vec<TelemetrySample>, GatewayError>;
}

/// Opaque models; feature extraction happens on the service side.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn classify(&self, history: &[TelemetrySample]) -> Result<QualityVerdict, GatewayError>;
    async fn regress_dimensions(&self, history: &[TelemetrySample]) -> Result<Vec<f64>, GatewayError>;
}

#[async_trait]
pub trait AssetLedger: Send + Sync {
    async fn create_product(&self, piece_type: &str, asset_id: &AssetId) -> Result<(), GatewayError>;
    async fn append_sample(&self, sample: &TelemetrySample) -> Result<(), GatewayError>;
    async fn update_state(&self, asset_id: &AssetId, state: &str) -> Result<(), GatewayError>;
    async fn update_dimensions(&self, asset_id: &AssetId, dimensions: &DimensionReport) -> Result<(), GatewayError>;
}

/// The full set of collaborators handed to the state machine.
#[derive(Clone)]
pub struct Gateways {
    pub printer: Arc<dyn PrinterLink>,
    pub store: Arc<dyn TelemetryStore>,
    pub inference: Arc<dyn InferenceEngine>,
    pub ledger: Arc<dyn AssetLedger>,
}

impl Gateways {
    /// All four collaborators backed by one shared HTTP client.
    pub fn http(config: &Config) -> Result<Self, GatewayError> {
        let gateway = Arc::new(HttpGateway::new(&config.gateway, &config.destinations)?);
        Ok(Self {
            printer: gateway.clone(),
            store: gateway.clone(),
            inference: gateway.clone(),
            ledger: gateway,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_values_map_to_extended_report() {
        let report = DimensionReport::from_predictions(&[10.0, 20.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["comprimento"], 10.0);
        assert_eq!(json["largura"], 20.0);
        assert_eq!(json["comprimento_ext1"], 3.0);
        assert_eq!(json["comprimento_ext2"], 4.0);
        assert_eq!(json["largura_ext1"], 5.0);
        assert_eq!(json["largura_ext2"], 6.0);
        assert_eq!(json["altura"], 7.0);
    }

    #[test]
    fn three_values_map_to_basic_report() {
        let report = DimensionReport::from_predictions(&[10.0, 20.0, 4.0]).unwrap();
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"comprimento": 10.0, "largura": 20.0, "altura": 4.0})
        );
    }

    #[test]
    fn other_lengths_are_rejected() {
        for values in [&[][..], &[1.0][..], &[1.0, 2.0, 3.0, 4.0][..]] {
            assert!(matches!(
                DimensionReport::from_predictions(values),
                Err(GatewayError::InvalidDimensions(n)) if n == values.len()
            ));
        }
    }

    #[test]
    fn verdict_wire_and_ledger_values() {
        assert_eq!(serde_json::from_str::<QualityVerdict>("\"NOK\"").unwrap(), QualityVerdict::Nok);
        assert_eq!(QualityVerdict::Ok.ledger_state(), "predicted OK");
        assert_eq!(QualityVerdict::Nok.ledger_state(), "predicted NOK");
    }
}
