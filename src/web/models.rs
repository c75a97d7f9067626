//! Contains the data models for API responses.

use serde::Serialize;

use crate::print_job::JobSession;

/// Returned when a start request is accepted.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub session: JobSession,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
}
