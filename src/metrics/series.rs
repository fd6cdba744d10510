use std::time::Duration;

use serde::Serialize;

use crate::domain::RequestOutcome;

use super::stats::{micros_to_secs, ratio};

/// Bucket width of [`requests_status`].
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);
/// Sliding window of [`throughput_series`].
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5);
/// Upper bound on points per series; the step widens to stay under it.
const MAX_POINTS: u64 = 100_000;

/// Cumulative request counts at the end of one interval. `t` is seconds
/// since the first send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPoint {
    pub t: f64,
    pub in_progress: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestsStatusSeries {
    pub test_id: String,
    /// Seconds.
    pub interval: f64,
    pub points: Vec<StatusPoint>,
}

/// Token rate centred on `t`, seconds since the first token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputPoint {
    pub t: f64,
    pub tokens_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputSeries {
    pub test_id: String,
    /// Seconds between points.
    pub time_step: f64,
    /// Seconds.
    pub window: f64,
    pub points: Vec<ThroughputPoint>,
}

/// Requests in flight, succeeded and failed over the run, bucketed by
/// `interval`. A request counts as issued in the bucket of its send and as
/// settled in the bucket of its completion.
#[must_use]
pub fn requests_status(
    test_id: &str,
    outcomes: &[RequestOutcome],
    interval: Duration,
) -> RequestsStatusSeries {
    let series = |step_us: u64, points| RequestsStatusSeries {
        test_id: test_id.to_owned(),
        interval: micros_to_secs(step_us),
        points,
    };
    let requested_us = duration_us(interval);
    let Some(start_us) = outcomes.iter().map(|outcome| outcome.sent_at_us).min() else {
        return series(requested_us, Vec::new());
    };
    let end_us = outcomes
        .iter()
        .map(|outcome| outcome.completed_at_us)
        .max()
        .unwrap_or(start_us);
    let span_us = end_us.saturating_sub(start_us);
    let step_us = widened_step(requested_us, span_us);
    let buckets = span_us.checked_div(step_us).unwrap_or(0).saturating_add(1);

    let mut issued = vec![0_u64; usize::try_from(buckets).unwrap_or(0)];
    let mut succeeded = issued.clone();
    let mut failed = issued.clone();
    let bucket_of = |at: u64| {
        let index = at.saturating_sub(start_us).checked_div(step_us).unwrap_or(0);
        usize::try_from(index.min(buckets.saturating_sub(1))).unwrap_or(0)
    };
    for outcome in outcomes {
        bump(&mut issued, bucket_of(outcome.sent_at_us));
        let settled = if outcome.is_successful() {
            &mut succeeded
        } else {
            &mut failed
        };
        bump(settled, bucket_of(outcome.completed_at_us));
    }

    let mut points = Vec::with_capacity(issued.len());
    let (mut total_issued, mut total_ok, mut total_failed) = (0_u64, 0_u64, 0_u64);
    for (index, ((issued, ok), bad)) in issued
        .iter()
        .zip(succeeded.iter())
        .zip(failed.iter())
        .enumerate()
    {
        total_issued = total_issued.saturating_add(*issued);
        total_ok = total_ok.saturating_add(*ok);
        total_failed = total_failed.saturating_add(*bad);
        points.push(StatusPoint {
            t: micros_to_secs((index as u64).saturating_mul(step_us)),
            in_progress: total_issued
                .saturating_sub(total_ok)
                .saturating_sub(total_failed),
            succeeded: total_ok,
            failed: total_failed,
        });
    }
    series(step_us, points)
}

/// Tokens per second over a `window` centred on each point, one point every
/// `time_step` from the first token to the last. Tokens of failed requests
/// count too; they were served.
#[must_use]
pub fn throughput_series(
    test_id: &str,
    outcomes: &[RequestOutcome],
    time_step: Duration,
    window: Duration,
) -> ThroughputSeries {
    let window_us = duration_us(window).max(1);
    let mut arrivals: Vec<u64> = outcomes
        .iter()
        .flat_map(|outcome| outcome.token_arrival_us.iter().copied())
        .collect();
    arrivals.sort_unstable();

    let requested_us = duration_us(time_step);
    let (Some(&first), Some(&last)) = (arrivals.first(), arrivals.last()) else {
        return ThroughputSeries {
            test_id: test_id.to_owned(),
            time_step: micros_to_secs(requested_us),
            window: micros_to_secs(window_us),
            points: Vec::new(),
        };
    };
    let span_us = last.saturating_sub(first);
    let step_us = widened_step(requested_us, span_us);
    let half_us = window_us / 2;

    let mut points = Vec::new();
    let mut offset_us = 0_u64;
    loop {
        let centre = first.saturating_add(offset_us);
        let from = arrivals.partition_point(|&at| at < centre.saturating_sub(half_us));
        let to = arrivals.partition_point(|&at| at <= centre.saturating_add(half_us));
        let count = to.saturating_sub(from) as u64;
        points.push(ThroughputPoint {
            t: micros_to_secs(offset_us),
            tokens_per_second: ratio(
                u128::from(count).saturating_mul(1_000_000),
                u128::from(window_us),
            ),
        });
        if offset_us >= span_us {
            break;
        }
        offset_us = offset_us.saturating_add(step_us);
    }

    ThroughputSeries {
        test_id: test_id.to_owned(),
        time_step: micros_to_secs(step_us),
        window: micros_to_secs(window_us),
        points,
    }
}

fn bump(counts: &mut [u64], index: usize) {
    if let Some(slot) = counts.get_mut(index) {
        *slot = slot.saturating_add(1);
    }
}

fn widened_step(requested_us: u64, span_us: u64) -> u64 {
    requested_us.max(span_us.div_ceil(MAX_POINTS)).max(1)
}

fn duration_us(value: Duration) -> u64 {
    u64::try_from(value.as_micros()).unwrap_or(u64::MAX)
}
