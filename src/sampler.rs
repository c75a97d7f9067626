// src/sampler.rs - Log retrieval, sample extraction and fan-out
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use printwatch_shared::time::{is_after_start, now_at, parse_log_timestamp};
use printwatch_shared::{TelemetryExtractor, TelemetrySample};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelKind, ChannelSet};
use crate::control::{ControlError, JobContext, SharedControlState};
use crate::gateway::{GatewayError, Gateways};
use crate::milestone::{MilestoneReport, MilestoneTrigger};
use crate::supervisor::guarded;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Control state unavailable: {0}")]
    Control(#[from] ControlError),
    #[error("Log retrieval failed: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    /// Job was not printing; nothing fetched.
    pub skipped: bool,
    pub entries: usize,
    /// Entries already handled by an earlier cycle.
    pub replayed: usize,
    pub samples: Vec<TelemetrySample>,
    pub milestones: Vec<MilestoneReport>,
}

pub struct TelemetrySampler {
    control: Arc<SharedControlState>,
    gateways: Gateways,
    channels: ChannelSet,
    trigger: MilestoneTrigger,
    required_nozzle_target: f64,
    start_offset: FixedOffset,
    interval: Duration,
    // Newest log timestamp already fanned out for this job.
    high_water: Mutex<Option<DateTime<Utc>>>,
}

impl TelemetrySampler {
    pub fn new(
        control: Arc<SharedControlState>,
        gateways: Gateways,
        channels: ChannelSet,
        trigger: MilestoneTrigger,
        required_nozzle_target: f64,
        start_offset: FixedOffset,
        interval: Duration,
    ) -> Self {
        Self {
            control,
            gateways,
            channels,
            trigger,
            required_nozzle_target,
            start_offset,
            interval,
            high_water: Mutex::new(None),
        }
    }

    fn high_water(&self) -> Option<DateTime<Utc>> {
        self.high_water.lock().map(|mark| *mark).unwrap_or(None)
    }

    fn raise_high_water(&self, at: DateTime<Utc>) {
        if let Ok(mut mark) = self.high_water.lock() {
            if mark.is_none_or(|seen| at > seen) {
                *mark = Some(at);
            }
        }
    }

    /// Fetch the job's log, turn it into samples, and push each one downstream.
    pub async fn run_cycle(&self) -> Result<CycleSummary, SamplerError> {
        let ctx = self.control.snapshot().await?;
        let (Some(job), Some(start_time)) = (ctx.job.as_ref(), ctx.start_time) else {
            return Ok(CycleSummary { skipped: true, ..CycleSummary::default() });
        };
        if !ctx.printing {
            return Ok(CycleSummary { skipped: true, ..CycleSummary::default() });
        }

        let entries = self.gateways.printer.fetch_logs(&job.printer, &job.filename).await?;
        let mut summary = CycleSummary {
            entries: entries.len(),
            ..CycleSummary::default()
        };

        // Temperature pairing never crosses a cycle boundary. Replayed entries still feed the
        // extractor so a new position line can pair with an older temperature line.
        let mut extractor = TelemetryExtractor::new(self.required_nozzle_target);
        let high_water = self.high_water();
        let mut newest = None;
        for entry in entries.iter().filter(|e| is_after_start(&e.ts, start_time, self.start_offset)) {
            let Ok(at) = parse_log_timestamp(&entry.ts) else {
                continue;
            };
            let replayed = high_water.is_some_and(|seen| at <= seen);
            if replayed {
                summary.replayed += 1;
            } else {
                newest = newest.max(Some(at));
            }
            for line in entry.lines() {
                let Some(sample) = extractor.observe(line, &job.filename, now_at(self.start_offset)) else {
                    continue;
                };
                if replayed {
                    continue;
                }
                let report = self.publish(&sample, &ctx).await;
                if !report.is_empty() {
                    summary.milestones.push(report);
                }
                summary.samples.push(sample);
            }
        }

        if let Some(at) = newest {
            self.raise_high_water(at);
        }
        if !summary.samples.is_empty() {
            tracing::debug!(
                entries = summary.entries,
                replayed = summary.replayed,
                samples = summary.samples.len(),
                "Sampling cycle complete"
            );
        }
        Ok(summary)
    }

    async fn publish(&self, sample: &TelemetrySample, ctx: &JobContext) -> MilestoneReport {
        let kind = if sample.position.is_some() {
            ChannelKind::Position
        } else {
            ChannelKind::Speed
        };
        self.channels.get(kind).signal_observed();

        if let Err(e) = self.gateways.store.append(sample).await {
            tracing::warn!(error = %e, "Failed to append sample to telemetry store");
        }
        if let Err(e) = self.gateways.ledger.append_sample(sample).await {
            tracing::warn!(error = %e, "Failed to append sample to asset ledger");
        }
        self.trigger.on_sample(sample, ctx).await
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Sampler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = guarded("sampler", self.run_cycle()) => {
                    if let Some(Err(e)) = result {
                        tracing::warn!(error = %e, "Sampling cycle failed");
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Sampler shutting down");
    }
}
