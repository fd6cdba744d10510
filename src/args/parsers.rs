use std::time::Duration;

use crate::config::parse_duration_value;
use crate::error::{AppError, AppResult};

pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration_value(s).map_err(AppError::config)
}
