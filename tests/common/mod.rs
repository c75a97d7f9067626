//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use printwatch::config::Config;
use printwatch::gateway::{
    AssetLedger, DimensionReport, GatewayError, Gateways, InferenceEngine, PrinterLink, QualityVerdict, TelemetryStore,
};
use printwatch::print_job::{AssetId, StartRequest};
use printwatch_shared::{LogEntry, PrinterStatus, TelemetrySample};

pub const TEMP_LINE: &str = "T:210.1/200.0 B:60.2/60.0 @:128 B@:64";
/// Far enough in the future to pass any start-time filter.
pub const FUTURE_TS: &str = "2099-01-01T00:00:00.000Z";

fn unavailable(path: &str) -> GatewayError {
    GatewayError::Status {
        path: path.to_string(),
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub statuses: Mutex<VecDeque<PrinterStatus>>,
    pub last_status: Mutex<Option<PrinterStatus>>,
    pub fail_status: AtomicBool,
    pub commands: Mutex<Vec<(String, String)>>,
    pub fail_commands: AtomicBool,
    pub subscriptions: AtomicUsize,
    pub logs: Mutex<Vec<LogEntry>>,
    pub stored: Mutex<Vec<TelemetrySample>>,
    pub fail_store: AtomicBool,
    pub classify_calls: AtomicUsize,
    pub regress_calls: AtomicUsize,
    pub verdict: Mutex<Option<QualityVerdict>>,
    pub dimensions: Mutex<Vec<f64>>,
    pub products: Mutex<Vec<(String, String)>>,
    pub ledger_samples: AtomicUsize,
    pub ledger_states: Mutex<Vec<(String, String)>>,
    pub ledger_dimensions: Mutex<Vec<(String, DimensionReport)>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        *fake.verdict.lock().unwrap() = Some(QualityVerdict::Ok);
        *fake.dimensions.lock().unwrap() = vec![40.0, 20.0, 4.0];
        Arc::new(fake)
    }

    pub fn gateways(self: &Arc<Self>) -> Gateways {
        Gateways {
            printer: self.clone(),
            store: self.clone(),
            inference: self.clone(),
            ledger: self.clone(),
        }
    }

    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = PrinterStatus>) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub fn set_logs(&self, entries: Vec<LogEntry>) {
        *self.logs.lock().unwrap() = entries;
    }

    pub fn sent_commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().iter().map(|(_, cmd)| cmd.clone()).collect()
    }

    pub fn count_command(&self, command: &str) -> usize {
        self.commands.lock().unwrap().iter().filter(|(_, cmd)| cmd == command).count()
    }
}

#[async_trait]
impl PrinterLink for FakeGateway {
    async fn status(&self, _printer: &str) -> Result<PrinterStatus, GatewayError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(unavailable("/printer/status"));
        }
        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last_status.lock().unwrap();
        if let Some(status) = next {
            *last = Some(status);
        }
        Ok(last.clone().unwrap_or(PrinterStatus::Operational))
    }

    async fn send_command(&self, printer: &str, command: &str) -> Result<(), GatewayError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(unavailable("/printer/command"));
        }
        self.commands.lock().unwrap().push((printer.to_string(), command.to_string()));
        Ok(())
    }

    async fn subscribe(&self, _printer: &str) -> Result<(), GatewayError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_logs(&self, _printer: &str, _filename: &str) -> Result<Vec<LogEntry>, GatewayError> {
        Ok(self.logs.lock().unwrap().clone())
    }
}

#[async_trait]
impl TelemetryStore for FakeGateway {
    async fn append(&self, sample: &TelemetrySample) -> Result<(), GatewayError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(unavailable("/csv/append"));
        }
        self.stored.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn query(&self, _start_time: NaiveDateTime, filename: &str) -> Result<Vec<TelemetrySample>, GatewayError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(unavailable("/csv/get"));
        }
        Ok(self
            .stored
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.filename == filename)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InferenceEngine for FakeGateway {
    async fn classify(&self, _history: &[TelemetrySample]) -> Result<QualityVerdict, GatewayError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        (*self.verdict.lock().unwrap()).ok_or_else(|| unavailable("/model/predict1"))
    }

    async fn regress_dimensions(&self, _history: &[TelemetrySample]) -> Result<Vec<f64>, GatewayError> {
        self.regress_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.dimensions.lock().unwrap().clone())
    }
}

#[async_trait]
impl AssetLedger for FakeGateway {
    async fn create_product(&self, piece_type: &str, asset_id: &AssetId) -> Result<(), GatewayError> {
        self.products
            .lock()
            .unwrap()
            .push((piece_type.to_string(), asset_id.to_string()));
        Ok(())
    }

    async fn append_sample(&self, _sample: &TelemetrySample) -> Result<(), GatewayError> {
        self.ledger_samples.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_state(&self, asset_id: &AssetId, state: &str) -> Result<(), GatewayError> {
        self.ledger_states
            .lock()
            .unwrap()
            .push((asset_id.to_string(), state.to_string()));
        Ok(())
    }

    async fn update_dimensions(&self, asset_id: &AssetId, dimensions: &DimensionReport) -> Result<(), GatewayError> {
        self.ledger_dimensions
            .lock()
            .unwrap()
            .push((asset_id.to_string(), dimensions.clone()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.monitor.jobs = HashMap::from([
        ("part_square".to_string(), "QUADRADO".to_string()),
        ("zd5b20~1.gco".to_string(), "L".to_string()),
    ]);
    config
}

pub fn start_request(filename: &str) -> StartRequest {
    StartRequest {
        filename: filename.to_string(),
        speed_factor: 100.0,
        printer: "192.168.0.10".to_string(),
        asset_id: "asset-1".into(),
    }
}

pub fn log_entry(lines: &[&str]) -> LogEntry {
    LogEntry::new(FUTURE_TS, lines.iter().map(|l| l.to_string()).collect())
}
