// src/control.rs - Job context shared by the orchestrator and its workers
use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::print_job::AssetId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Control guard not acquired within {0:?}")]
    GuardTimeout(Duration),
}

/// Build-height checkpoints that trigger an inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// Pass/fail classification, first layer.
    QualityCheck,
    /// Dimension regression.
    DimensionCheck,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::QualityCheck => write!(f, "quality check"),
            Milestone::DimensionCheck => write!(f, "dimension check"),
        }
    }
}

/// Which job is being monitored and on which machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobIdentity {
    pub filename: String,
    pub asset_id: AssetId,
    pub printer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobContext {
    pub job: Option<JobIdentity>,
    pub start_time: Option<NaiveDateTime>,
    pub quality_checked: bool,
    pub dimensions_checked: bool,
    pub printing: bool,
}

impl JobContext {
    pub fn is_reset(&self) -> bool {
        *self == JobContext::default()
    }

    pub fn filename(&self) -> Option<&str> {
        self.job.as_ref().map(|job| job.filename.as_str())
    }

    fn flag_mut(&mut self, milestone: Milestone) -> &mut bool {
        match milestone {
            Milestone::QualityCheck => &mut self.quality_checked,
            Milestone::DimensionCheck => &mut self.dimensions_checked,
        }
    }

    pub fn milestone_done(&self, milestone: Milestone) -> bool {
        match milestone {
            Milestone::QualityCheck => self.quality_checked,
            Milestone::DimensionCheck => self.dimensions_checked,
        }
    }
}

/// Guarded [`JobContext`].
///
/// Every operation takes the one guard for the whole context, so readers see either the reset
/// value or a fully populated job. Acquisition is bounded by `guard_timeout`; on expiry the
/// operation is abandoned and reported as [`ControlError::GuardTimeout`].
#[derive(Debug)]
pub struct SharedControlState {
    inner: Mutex<JobContext>,
    guard_timeout: Duration,
}

impl SharedControlState {
    pub fn new(guard_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(JobContext::default()),
            guard_timeout,
        }
    }

    async fn guard(&self, operation: &str) -> Result<MutexGuard<'_, JobContext>, ControlError> {
        match tokio::time::timeout(self.guard_timeout, self.inner.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.guard_timeout, "Control guard unavailable, abandoning");
                Err(ControlError::GuardTimeout(self.guard_timeout))
            }
        }
    }

    pub async fn reset(&self) -> Result<(), ControlError> {
        let mut ctx = self.guard("reset").await?;
        *ctx = JobContext::default();
        Ok(())
    }

    /// Replace the context with a fresh job. Flags start cleared and the job is not yet active.
    pub async fn begin_job(&self, job: JobIdentity, start_time: NaiveDateTime) -> Result<(), ControlError> {
        let mut ctx = self.guard("begin_job").await?;
        *ctx = JobContext {
            job: Some(job),
            start_time: Some(start_time),
            ..JobContext::default()
        };
        Ok(())
    }

    pub async fn set_active(&self, active: bool) -> Result<(), ControlError> {
        self.guard("set_active").await?.printing = active;
        Ok(())
    }

    pub async fn is_active(&self) -> Result<bool, ControlError> {
        Ok(self.guard("is_active").await?.printing)
    }

    pub async fn milestone_done(&self, milestone: Milestone) -> Result<bool, ControlError> {
        Ok(self.guard("milestone_done").await?.milestone_done(milestone))
    }

    pub async fn set_milestone_done(&self, milestone: Milestone, done: bool) -> Result<(), ControlError> {
        *self.guard("set_milestone_done").await?.flag_mut(milestone) = done;
        Ok(())
    }

    /// Atomically mark `milestone` done. Returns `true` only for the caller that flipped it.
    pub async fn claim_milestone(&self, milestone: Milestone) -> Result<bool, ControlError> {
        let mut ctx = self.guard("claim_milestone").await?;
        let flag = ctx.flag_mut(milestone);
        if *flag {
            return Ok(false);
        }
        *flag = true;
        Ok(true)
    }

    pub async fn snapshot(&self) -> Result<JobContext, ControlError> {
        Ok(self.guard("snapshot").await?.clone())
    }
}
