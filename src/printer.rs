// src/printer.rs - Job lifecycle state machine driven by status polling
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use printwatch_shared::PrinterStatus;
use printwatch_shared::time::now_at;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::channel::{ChannelSet, ChannelStats, CommandResponseCoordinator};
use crate::config::{Config, ConfigError};
use crate::control::{ControlError, JobContext, SharedControlState};
use crate::gateway::{GatewayError, Gateways};
use crate::milestone::MilestoneTrigger;
use crate::print_job::{JobSession, StartRequest};
use crate::sampler::TelemetrySampler;
use crate::supervisor::Supervisor;
use crate::web::printer_channel::MonitorRequest;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Control state error: {0}")]
    Control(#[from] ControlError),
    #[error("Already monitoring job '{0}'")]
    Busy(String),
    #[error("No job is being monitored")]
    NoJob,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    AwaitingActive,
    Active,
    Paused,
    Completed,
}

impl fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorPhase::Idle => "idle",
            MonitorPhase::AwaitingActive => "awaiting active",
            MonitorPhase::Active => "active",
            MonitorPhase::Paused => "paused",
            MonitorPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelReport {
    pub position: ChannelStats,
    pub speed: ChannelStats,
}

/// Body of `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub phase: MonitorPhase,
    pub session: Option<JobSession>,
    /// `None` when the control guard could not be taken in time.
    pub context: Option<JobContext>,
    pub channels: ChannelReport,
}

pub struct PrinterStateMachine {
    config: Config,
    gateways: Gateways,
    control: Arc<SharedControlState>,
    channels: ChannelSet,
    phase: MonitorPhase,
    session: Option<JobSession>,
    supervisor: Option<Supervisor>,
    start_offset: FixedOffset,
    last_state_log: Option<Instant>,
}

impl PrinterStateMachine {
    pub fn new(config: Config, gateways: Gateways) -> Result<Self, MonitorError> {
        config.validate()?;
        let start_offset = config.monitor.start_time_offset()?;
        let control = Arc::new(SharedControlState::new(config.monitor.guard_timeout()));
        Ok(Self {
            config,
            gateways,
            control,
            channels: ChannelSet::new(),
            phase: MonitorPhase::Idle,
            session: None,
            supervisor: None,
            start_offset,
            last_state_log: None,
        })
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&JobSession> {
        self.session.as_ref()
    }

    pub fn control(&self) -> &Arc<SharedControlState> {
        &self.control
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Token shared by the current job's workers, if any are running.
    pub fn worker_token(&self) -> Option<CancellationToken> {
        self.supervisor.as_ref().map(Supervisor::token)
    }

    pub fn workers_running(&self) -> bool {
        self.supervisor.is_some()
    }

    fn set_phase(&mut self, phase: MonitorPhase) {
        if self.phase != phase {
            tracing::info!(from = %self.phase, to = %phase, "Monitor phase changed");
            self.phase = phase;
        }
    }

    /// Validate and start a job, then wait for the machine to report it printing.
    pub async fn begin_monitoring(&mut self, request: StartRequest) -> Result<JobSession, MonitorError> {
        request.validate().map_err(MonitorError::InvalidRequest)?;
        let piece_type = self
            .config
            .monitor
            .piece_type(&request.filename)
            .ok_or_else(|| ConfigError::DisallowedJob(request.filename.clone()))?
            .to_string();
        if let Some(session) = &self.session {
            return Err(MonitorError::Busy(session.filename.clone()));
        }

        for command in request.start_sequence() {
            self.gateways.printer.send_command(&request.printer, &command).await?;
        }
        self.gateways.ledger.create_product(&piece_type, &request.asset_id).await?;

        let session = JobSession::new(&request, &piece_type);
        tracing::info!(
            session = %session.id,
            filename = %session.filename,
            printer = %session.printer,
            piece_type = %session.piece_type,
            "Job started, waiting for the machine to report printing"
        );
        self.session = Some(session.clone());
        self.set_phase(MonitorPhase::AwaitingActive);
        Ok(session)
    }

    /// Apply one status observation. Returns the phase after the transition.
    pub async fn handle_status(&mut self, status: &PrinterStatus) -> Result<MonitorPhase, MonitorError> {
        match (self.phase, status) {
            (_, PrinterStatus::Unknown(raw)) => {
                tracing::warn!(status = %raw, phase = %self.phase, "Unrecognised machine status, holding state");
            }
            (MonitorPhase::AwaitingActive, PrinterStatus::Printing) => self.enter_active().await?,
            (MonitorPhase::Active, PrinterStatus::Paused) => {
                self.control.set_active(false).await?;
                self.set_phase(MonitorPhase::Paused);
            }
            (MonitorPhase::Paused, PrinterStatus::Printing) => {
                self.control.set_active(true).await?;
                self.set_phase(MonitorPhase::Active);
            }
            (MonitorPhase::Active | MonitorPhase::Paused, PrinterStatus::Operational) => {
                self.set_phase(MonitorPhase::Completed);
                self.teardown().await;
            }
            _ => {}
        }
        Ok(self.phase)
    }

    async fn enter_active(&mut self) -> Result<(), MonitorError> {
        let Some(session) = self.session.clone() else {
            return Err(MonitorError::NoJob);
        };
        self.control.begin_job(session.identity(), now_at(self.start_offset)).await?;
        self.control.set_active(true).await?;

        if let Err(e) = self.gateways.printer.subscribe(&session.printer).await {
            tracing::error!(error = %e, printer = %session.printer, "Log stream subscription failed");
        }

        self.channels = ChannelSet::new();
        self.supervisor = Some(self.spawn_workers(&session));
        self.set_phase(MonitorPhase::Active);
        Ok(())
    }

    fn spawn_workers(&self, session: &JobSession) -> Supervisor {
        let mut supervisor = Supervisor::new();
        let span = tracing::info_span!("job", session = %session.id, filename = %session.filename);

        for channel in [self.channels.position.clone(), self.channels.speed.clone()] {
            let coordinator = CommandResponseCoordinator::new(
                channel,
                session.printer.clone(),
                self.gateways.printer.clone(),
                self.control.clone(),
                &self.config.channels,
            );
            let token = supervisor.token();
            supervisor.spawn("command loop", coordinator.run(token).instrument(span.clone()));
        }

        let trigger = MilestoneTrigger::new(self.control.clone(), self.gateways.clone(), &self.config.milestones);
        let sampler = TelemetrySampler::new(
            self.control.clone(),
            self.gateways.clone(),
            self.channels.clone(),
            trigger,
            self.config.monitor.required_nozzle_target,
            self.start_offset,
            Duration::from_millis(self.config.monitor.sample_interval_ms),
        );
        let token = supervisor.token();
        supervisor.spawn("sampler", sampler.run(token).instrument(span));
        supervisor
    }

    /// Reset the job context, stop the workers, and return to idle.
    async fn teardown(&mut self) {
        if let Err(e) = self.control.reset().await {
            tracing::error!(error = %e, "Failed to reset job context");
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor
                .shutdown(Duration::from_millis(self.config.monitor.worker_join_grace_ms))
                .await;
        }
        if let Some(session) = self.session.take() {
            tracing::info!(session = %session.id, filename = %session.filename, "Stopped monitoring job");
        }
        self.set_phase(MonitorPhase::Idle);
    }

    /// Stop monitoring the current job (stop request).
    pub async fn abandon(&mut self) -> Result<(), MonitorError> {
        if self.session.is_none() {
            return Err(MonitorError::NoJob);
        }
        self.teardown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if self.session.is_some() || self.supervisor.is_some() {
            tracing::info!("Shutting down, abandoning current job");
            self.teardown().await;
        }
    }

    /// Query the machine once and apply the result. Idle without a job does nothing.
    pub async fn poll_once(&mut self) -> Result<MonitorPhase, MonitorError> {
        let Some(printer) = self.session.as_ref().map(|s| s.printer.clone()) else {
            return Ok(self.phase);
        };
        let status = self.gateways.printer.status(&printer).await?;
        tracing::debug!(%status, phase = %self.phase, "Machine status");
        self.handle_status(&status).await
    }

    pub fn poll_interval(&self) -> Duration {
        let monitor = &self.config.monitor;
        let ms = match self.phase {
            MonitorPhase::Idle | MonitorPhase::Completed => monitor.idle_poll_ms,
            MonitorPhase::AwaitingActive => monitor.awaiting_poll_ms,
            MonitorPhase::Active => monitor.active_poll_ms,
            MonitorPhase::Paused => monitor.paused_poll_ms,
        };
        Duration::from_millis(ms)
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            session: self.session.clone(),
            context: self.control.snapshot().await.ok(),
            channels: ChannelReport {
                position: self.channels.position.stats(),
                speed: self.channels.speed.stats(),
            },
        }
    }

    fn maybe_log_state(&mut self) {
        let interval = Duration::from_secs(self.config.monitor.state_log_interval_secs);
        let due = self.last_state_log.is_none_or(|at| at.elapsed() >= interval);
        if due {
            let filename = self.session.as_ref().map(|s| s.filename.as_str()).unwrap_or("-");
            tracing::info!(phase = %self.phase, filename, "Monitor state");
            self.last_state_log = Some(Instant::now());
        }
    }

    async fn handle_request(&mut self, request: MonitorRequest) {
        match request {
            MonitorRequest::Start { request, respond_to } => {
                let result = self.begin_monitoring(request).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Start request rejected");
                }
                let _ = respond_to.send(result);
            }
            MonitorRequest::Stop { respond_to } => {
                let _ = respond_to.send(self.abandon().await);
            }
            MonitorRequest::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status_snapshot().await);
            }
        }
    }

    /// Serve control requests and poll the machine until `cancel` fires.
    pub async fn run(mut self, mut requests: mpsc::Receiver<MonitorRequest>, cancel: CancellationToken) {
        tracing::info!("State machine started");
        let mut requests_open = true;
        let mut next_poll = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv(), if requests_open => match request {
                    Some(request) => {
                        let was = self.phase;
                        self.handle_request(request).await;
                        if self.phase != was {
                            next_poll = Instant::now() + self.poll_interval();
                        }
                    }
                    None => requests_open = false,
                },
                _ = tokio::time::sleep_until(next_poll) => {
                    let delay = match self.poll_once().await {
                        Ok(_) => self.poll_interval(),
                        Err(e) => {
                            tracing::warn!(error = %e, phase = %self.phase, "Status poll failed, retrying");
                            Duration::from_millis(self.config.monitor.status_retry_ms)
                        }
                    };
                    self.maybe_log_state();
                    next_poll = Instant::now() + delay;
                }
            }
        }
        self.shutdown().await;
        tracing::info!("State machine stopped");
    }
}
