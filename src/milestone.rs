//! Build-height checkpoints.
//!
//! When a position sample reaches a configured height, the job's sample history is pulled from
//! the telemetry store and handed to the matching model; the result is written to the asset
//! ledger. Each checkpoint is claimed in [`SharedControlState`] before any remote call, so it
//! fires at most once per job even when the call fails.

use std::sync::Arc;

use printwatch_shared::TelemetrySample;

use crate::config::MilestoneConfig;
use crate::control::{JobContext, Milestone, SharedControlState};
use crate::gateway::{DimensionReport, GatewayError, Gateways, QualityVerdict};

const HEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum MilestoneOutcome {
    Verdict(QualityVerdict),
    Dimensions(DimensionReport),
    /// Nothing recorded yet for this job; inference skipped.
    EmptyHistory,
    Failed(String),
}

/// What one [`MilestoneTrigger::on_sample`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilestoneReport {
    pub fired: Vec<(Milestone, MilestoneOutcome)>,
}

impl MilestoneReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    pub fn outcome(&self, milestone: Milestone) -> Option<&MilestoneOutcome> {
        self.fired.iter().find(|(m, _)| *m == milestone).map(|(_, outcome)| outcome)
    }
}

pub struct MilestoneTrigger {
    control: Arc<SharedControlState>,
    gateways: Gateways,
    quality_check_height: f64,
    dimension_check_height: f64,
}

impl MilestoneTrigger {
    pub fn new(control: Arc<SharedControlState>, gateways: Gateways, config: &MilestoneConfig) -> Self {
        Self {
            control,
            gateways,
            quality_check_height: config.quality_check_height,
            dimension_check_height: config.dimension_check_height,
        }
    }

    fn height_of(&self, milestone: Milestone) -> f64 {
        match milestone {
            Milestone::QualityCheck => self.quality_check_height,
            Milestone::DimensionCheck => self.dimension_check_height,
        }
    }

    pub async fn on_sample(&self, sample: &TelemetrySample, ctx: &JobContext) -> MilestoneReport {
        let mut report = MilestoneReport::default();
        let Some(z) = sample.height() else {
            return report;
        };

        for milestone in [Milestone::QualityCheck, Milestone::DimensionCheck] {
            if (z - self.height_of(milestone)).abs() > HEIGHT_TOLERANCE || ctx.milestone_done(milestone) {
                continue;
            }
            match self.control.claim_milestone(milestone).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(%milestone, error = %e, "Could not claim milestone");
                    continue;
                }
            }

            tracing::info!(%milestone, z, "Milestone reached, running inference");
            let outcome = match self.fire(milestone, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(%milestone, error = %e, "Milestone inference failed");
                    MilestoneOutcome::Failed(e.to_string())
                }
            };
            report.fired.push((milestone, outcome));
        }
        report
    }

    async fn fire(&self, milestone: Milestone, ctx: &JobContext) -> Result<MilestoneOutcome, GatewayError> {
        let (Some(job), Some(start_time)) = (ctx.job.as_ref(), ctx.start_time) else {
            return Ok(MilestoneOutcome::Failed("no job in progress".to_string()));
        };

        let history = self.gateways.store.query(start_time, &job.filename).await?;
        if history.is_empty() {
            tracing::warn!(%milestone, filename = %job.filename, "No stored samples, skipping inference");
            return Ok(MilestoneOutcome::EmptyHistory);
        }

        match milestone {
            Milestone::QualityCheck => {
                let verdict = self.gateways.inference.classify(&history).await?;
                tracing::info!(%verdict, asset_id = %job.asset_id, "Quality prediction received");
                self.gateways
                    .ledger
                    .update_state(&job.asset_id, verdict.ledger_state())
                    .await?;
                Ok(MilestoneOutcome::Verdict(verdict))
            }
            Milestone::DimensionCheck => {
                let values = self.gateways.inference.regress_dimensions(&history).await?;
                tracing::info!(?values, asset_id = %job.asset_id, "Dimension prediction received");
                let dimensions = DimensionReport::from_predictions(&values)?;
                self.gateways.ledger.update_dimensions(&job.asset_id, &dimensions).await?;
                Ok(MilestoneOutcome::Dimensions(dimensions))
            }
        }
    }
}
