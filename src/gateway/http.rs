//! reqwest client for the middleware.
//!
//! Every call is a JSON `POST` to `<base_url><path>`. Non-2xx responses become
//! [`GatewayError::Status`] carrying the response body for debugging.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use printwatch_shared::time::SAMPLE_TIMESTAMP_FORMAT;
use printwatch_shared::{LogEntry, PrinterStatus, TelemetrySample};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AssetLedger, DimensionReport, GatewayError, InferenceEngine, PrinterLink, QualityVerdict, TelemetryStore};
use crate::config::{DestinationConfig, GatewayConfig};
use crate::print_job::AssetId;

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    subscriber: String,
    destinations: DestinationConfig,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    prediction: Option<QualityVerdict>,
}

#[derive(Debug, Deserialize)]
struct RegressorReply {
    predictions: Option<Vec<f64>>,
}

impl HttpGateway {
    pub fn new(gateway: &GatewayConfig, destinations: &DestinationConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(gateway.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, gateway, destinations))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, gateway: &GatewayConfig, destinations: &DestinationConfig) -> Self {
        Self {
            client,
            base_url: gateway.base_url.trim_end_matches('/').to_string(),
            api_key: gateway.api_key.clone(),
            subscriber: gateway.subscriber.clone(),
            destinations: destinations.clone(),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::ensure_success(path, response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.post(path, body).await?.text().await?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn ensure_success(path: &str, response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(GatewayError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PrinterLink for HttpGateway {
    async fn status(&self, printer: &str) -> Result<PrinterStatus, GatewayError> {
        let reply: StatusReply = self
            .post_json("/printer/status", &json!({ "destination": printer, "key": self.api_key }))
            .await?;
        Ok(PrinterStatus::from_raw(&reply.state))
    }

    async fn send_command(&self, printer: &str, command: &str) -> Result<(), GatewayError> {
        tracing::debug!(printer, command, "Sending command");
        self.post(
            "/printer/command",
            &json!({ "destination": printer, "msg": command, "key": self.api_key }),
        )
        .await?;
        Ok(())
    }

    async fn subscribe(&self, printer: &str) -> Result<(), GatewayError> {
        self.post(
            "/printer/sub",
            &json!({ "destination": printer, "username": self.subscriber, "key": self.api_key }),
        )
        .await?;
        tracing::info!(printer, "Subscribed to machine log stream");
        Ok(())
    }

    async fn fetch_logs(&self, printer: &str, filename: &str) -> Result<Vec<LogEntry>, GatewayError> {
        self.post_json("/printer/info", &json!({ "destination": printer, "filename": filename }))
            .await
    }
}

#[async_trait]
impl TelemetryStore for HttpGateway {
    async fn append(&self, sample: &TelemetrySample) -> Result<(), GatewayError> {
        self.post("/csv/append", &json!({ "destination": self.destinations.store, "msg": sample }))
            .await?;
        Ok(())
    }

    async fn query(&self, start_time: NaiveDateTime, filename: &str) -> Result<Vec<TelemetrySample>, GatewayError> {
        let msg = json!({
            "start_time": start_time.format(SAMPLE_TIMESTAMP_FORMAT).to_string(),
            "filename": filename,
        });
        self.post_json("/csv/get", &json!({ "destination": self.destinations.store, "msg": msg }))
            .await
    }
}

#[async_trait]
impl InferenceEngine for HttpGateway {
    async fn classify(&self, history: &[TelemetrySample]) -> Result<QualityVerdict, GatewayError> {
        let path = "/model/predict1";
        let reply: ClassifierReply = self
            .post_json(path, &json!({ "destination": self.destinations.models, "msg": history }))
            .await?;
        reply.prediction.ok_or_else(|| GatewayError::Decode {
            path: path.to_string(),
            message: "missing prediction".to_string(),
        })
    }

    async fn regress_dimensions(&self, history: &[TelemetrySample]) -> Result<Vec<f64>, GatewayError> {
        let path = "/model/predict4";
        let reply: RegressorReply = self
            .post_json(path, &json!({ "destination": self.destinations.models, "msg": history }))
            .await?;
        reply.predictions.ok_or_else(|| GatewayError::Decode {
            path: path.to_string(),
            message: "missing predictions".to_string(),
        })
    }
}

#[async_trait]
impl AssetLedger for HttpGateway {
    async fn create_product(&self, piece_type: &str, asset_id: &AssetId) -> Result<(), GatewayError> {
        self.post("/aas/create", &json!({ "type": piece_type, "id": asset_id })).await?;
        tracing::info!(piece_type, %asset_id, "Ledger product created");
        Ok(())
    }

    async fn append_sample(&self, sample: &TelemetrySample) -> Result<(), GatewayError> {
        self.post("/aas/append", &json!({ "destination": self.destinations.ledger, "msg": sample }))
            .await?;
        Ok(())
    }

    async fn update_state(&self, asset_id: &AssetId, state: &str) -> Result<(), GatewayError> {
        self.post(
            "/aas/update/state",
            &json!({ "destination": self.destinations.ledger, "shellid": asset_id, "value": state }),
        )
        .await?;
        Ok(())
    }

    async fn update_dimensions(&self, asset_id: &AssetId, dimensions: &DimensionReport) -> Result<(), GatewayError> {
        self.post(
            "/aas/update/dimensions",
            &json!({ "destination": self.destinations.ledger, "shellid": asset_id, "msg": dimensions }),
        )
        .await?;
        Ok(())
    }
}
