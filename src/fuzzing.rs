use std::time::Duration;

use crate::config::types::RegistrationRequest;
use crate::config::{parse_duration_value, validate_registration};
use crate::dispatch::{SseDecoder, SseEvent};
use crate::domain::{TestConfig, TestId};
use crate::error::{AppError, AppResult};
use crate::schedule::ArrivalRule;

const SAMPLE_POINTS_MS: [u64; 4] = [0, 100, 1_500, 60_000];

/// Parses an arrival rule and samples it at a few fixed offsets.
///
/// # Errors
///
/// Returns an error when the rule does not parse or a sample fails.
pub fn arrival_rule_input(input: &str) -> AppResult<Vec<Option<u64>>> {
    let rule = ArrivalRule::parse(input)?;
    SAMPLE_POINTS_MS
        .iter()
        .map(|ms| {
            rule.cumulative_at(Duration::from_millis(*ms))
                .map_err(AppError::from)
        })
        .collect()
}

/// Decodes a registration payload and validates it.
///
/// # Errors
///
/// Returns an error when the payload is not JSON or fails validation.
pub fn registration_json_input(input: &str) -> AppResult<TestConfig> {
    let request: RegistrationRequest = serde_json::from_str(input)?;
    validate_registration(&request, TestId::from("fuzz")).map_err(AppError::from)
}

/// Feeds `data` to the SSE decoder split at `split`, then flushes it.
#[must_use]
pub fn sse_frames_input(data: &[u8], split: usize) -> Vec<SseEvent> {
    let (head, tail) = data.split_at(split.min(data.len()));
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(head);
    events.extend(decoder.push(tail));
    events.extend(decoder.finish());
    events
}

/// Parses a duration value from config.
///
/// # Errors
///
/// Returns an error when the duration is invalid.
pub fn parse_duration_value_input(input: &str) -> AppResult<Duration> {
    parse_duration_value(input).map_err(AppError::config)
}
