//! Messages between the web handlers and the state machine task.

use tokio::sync::oneshot;

use crate::print_job::{JobSession, StartRequest};
use crate::printer::{MonitorError, StatusSnapshot};

/// A request sent from a web handler to the state machine task.
#[derive(Debug)]
pub enum MonitorRequest {
    /// Start a job and begin monitoring it.
    Start {
        request: StartRequest,
        respond_to: oneshot::Sender<Result<JobSession, MonitorError>>,
    },
    /// Stop monitoring the current job.
    Stop {
        respond_to: oneshot::Sender<Result<(), MonitorError>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<StatusSnapshot>,
    },
}
