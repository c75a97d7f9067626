// src/channel.rs - One-outstanding-request protocol for the telemetry query commands
//
// Each query command (M114 position, M220 speed) owns a CommandChannel. A loop may only send
// the next query once the previous reply was seen in the log stream, or once the reply wait
// timed out and the permit was forced back.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::control::SharedControlState;
use crate::gateway::PrinterLink;
use crate::supervisor::guarded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Position,
    Speed,
}

impl ChannelKind {
    pub fn command<'a>(&self, config: &'a ChannelConfig) -> &'a str {
        match self {
            ChannelKind::Position => &config.position_command,
            ChannelKind::Speed => &config.speed_command,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Position => write!(f, "position"),
            ChannelKind::Speed => write!(f, "speed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub dispatched: u64,
    pub observed: u64,
    pub missed: u64,
    pub transport_failures: u64,
}

#[derive(Debug, Default)]
struct ChannelState {
    awaiting_response: bool,
    last_sent: Option<Instant>,
    stats: ChannelStats,
}

/// Single-slot permit: at most one unacknowledged query per channel.
#[derive(Debug)]
pub struct CommandChannel {
    kind: ChannelKind,
    state: Mutex<ChannelState>,
    released: Notify,
}

impl CommandChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            state: Mutex::new(ChannelState::default()),
            released: Notify::new(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `wait` for the channel to be idle and take the permit.
    /// Returns `false` if the previous query is still unanswered at the deadline.
    pub async fn acquire(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release between the check and the await is not lost.
            released.as_mut().enable();
            {
                let mut state = self.state();
                if !state.awaiting_response {
                    state.awaiting_response = true;
                    return true;
                }
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return false;
            }
        }
    }

    pub fn record_dispatch(&self) {
        let mut state = self.state();
        state.last_sent = Some(Instant::now());
        state.stats.dispatched += 1;
    }

    /// A reply for this channel showed up in the log stream.
    pub fn signal_observed(&self) {
        {
            let mut state = self.state();
            state.awaiting_response = false;
            state.stats.observed += 1;
        }
        self.released.notify_waiters();
    }

    /// Reply wait timed out; give the permit back so the next tick can retry.
    pub fn force_release(&self) {
        {
            let mut state = self.state();
            if state.awaiting_response {
                state.awaiting_response = false;
                state.stats.missed += 1;
            }
        }
        self.released.notify_waiters();
    }

    /// Sending failed, so no reply is coming.
    pub fn release_after_failure(&self) {
        {
            let mut state = self.state();
            state.awaiting_response = false;
            state.stats.transport_failures += 1;
        }
        self.released.notify_waiters();
    }

    pub fn is_awaiting(&self) -> bool {
        self.state().awaiting_response
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.state().last_sent
    }

    pub fn stats(&self) -> ChannelStats {
        self.state().stats
    }
}

/// Both telemetry channels, shared by the command loops and the sampler.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    pub position: Arc<CommandChannel>,
    pub speed: Arc<CommandChannel>,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSet {
    pub fn new() -> Self {
        Self {
            position: Arc::new(CommandChannel::new(ChannelKind::Position)),
            speed: Arc::new(CommandChannel::new(ChannelKind::Speed)),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &Arc<CommandChannel> {
        match kind {
            ChannelKind::Position => &self.position,
            ChannelKind::Speed => &self.speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Job not printing (or control state unavailable); nothing sent.
    Inactive,
    Dispatched,
    /// Previous query never answered; permit forced back.
    TimedOut,
    TransportFailed,
}

/// Drives one channel: send the query whenever the permit is free and the job is printing.
pub struct CommandResponseCoordinator {
    channel: Arc<CommandChannel>,
    command: String,
    printer_addr: String,
    printer: Arc<dyn PrinterLink>,
    control: Arc<SharedControlState>,
    tick_interval: Duration,
    response_timeout: Duration,
    inactive_backoff: Duration,
}

impl CommandResponseCoordinator {
    pub fn new(
        channel: Arc<CommandChannel>,
        printer_addr: String,
        printer: Arc<dyn PrinterLink>,
        control: Arc<SharedControlState>,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            command: channel.kind().command(config).to_string(),
            channel,
            printer_addr,
            printer,
            control,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            inactive_backoff: Duration::from_millis(config.inactive_backoff_ms),
        }
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    pub async fn tick(&self) -> TickOutcome {
        let kind = self.channel.kind();
        match self.control.is_active().await {
            Ok(true) => {}
            Ok(false) | Err(_) => return TickOutcome::Inactive,
        }

        if !self.channel.acquire(self.response_timeout).await {
            tracing::warn!(channel = %kind, command = %self.command, "Timed out waiting for reply, resending");
            self.channel.force_release();
            return TickOutcome::TimedOut;
        }

        match self.printer.send_command(&self.printer_addr, &self.command).await {
            Ok(()) => {
                self.channel.record_dispatch();
                TickOutcome::Dispatched
            }
            Err(e) => {
                tracing::warn!(channel = %kind, error = %e, "Failed to send query command");
                self.channel.release_after_failure();
                TickOutcome::TransportFailed
            }
        }
    }

    pub fn delay_after(&self, outcome: TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Inactive => self.inactive_backoff,
            _ => self.tick_interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let kind = self.channel.kind();
        tracing::info!(channel = %kind, command = %self.command, "Command loop started");
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = guarded("command loop", self.tick()) => outcome,
            };
            // A panicked tick may have left the permit taken.
            let delay = match outcome {
                Some(outcome) => self.delay_after(outcome),
                None => {
                    self.channel.force_release();
                    self.tick_interval
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!(channel = %kind, stats = ?self.channel.stats(), "Command loop shutting down");
    }
}
