use thiserror::Error;

use super::AppError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Test '{test_id}' not found.")]
    NotFound { test_id: String },
    #[error("Cannot start '{test_id}': test '{running}' is already running.")]
    Conflict { test_id: String, running: String },
    #[error("Test '{test_id}' is {status}; expected {expected}.")]
    InvalidTransition {
        test_id: String,
        status: &'static str,
        expected: &'static str,
    },
    #[error("Test '{test_id}' failed; request the report with partial=true to see partial data.")]
    ReportUnavailable { test_id: String },
    #[error("Run of '{test_id}' failed: {source}")]
    RunFatal {
        test_id: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("Run of '{test_id}' crashed: {message}")]
    RunCrashed { test_id: String, message: String },
    #[error("Test '{test_id}' is {status} and has no workload fingerprint yet.")]
    WorkloadUnavailable {
        test_id: String,
        status: &'static str,
    },
    #[error("Timed out waiting for test '{test_id}' to settle.")]
    WaitTimeout { test_id: String },
}
