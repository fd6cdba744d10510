use thiserror::Error;

use super::{
    ConfigError, CoordinatorError, DispatchError, ScheduleRuleError, ServerError, StoreError,
    ValidationError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Arrival rule error: {0}")]
    Schedule(#[from] ScheduleRuleError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Control API error: {0}")]
    Server(#[from] ServerError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn schedule<E>(error: E) -> Self
    where
        E: Into<ScheduleRuleError>,
    {
        error.into().into()
    }

    pub fn dispatch<E>(error: E) -> Self
    where
        E: Into<DispatchError>,
    {
        error.into().into()
    }

    pub fn store<E>(error: E) -> Self
    where
        E: Into<StoreError>,
    {
        error.into().into()
    }

    pub fn coordinator<E>(error: E) -> Self
    where
        E: Into<CoordinatorError>,
    {
        error.into().into()
    }

    pub fn server<E>(error: E) -> Self
    where
        E: Into<ServerError>,
    {
        error.into().into()
    }

    /// Short machine-readable tag for the error family, used by the control
    /// API error envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Schedule(_) => "schedule_rule",
            AppError::Coordinator(
                CoordinatorError::Conflict { .. }
                | CoordinatorError::InvalidTransition { .. }
                | CoordinatorError::ReportUnavailable { .. }
                | CoordinatorError::WorkloadUnavailable { .. },
            ) => "conflict",
            AppError::Coordinator(CoordinatorError::NotFound { .. }) => "not_found",
            AppError::Coordinator(CoordinatorError::WaitTimeout { .. }) => "timeout",
            AppError::Coordinator(
                CoordinatorError::RunFatal { .. } | CoordinatorError::RunCrashed { .. },
            ) => "run_fatal",
            AppError::Dispatch(_) => "run_fatal",
            AppError::Store(_) => "storage",
            AppError::Config(_) => "config",
            AppError::Io { .. }
            | AppError::Server(_)
            | AppError::Clap { .. }
            | AppError::Json { .. }
            | AppError::Join { .. } => "internal",
        }
    }
}
