use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{OutcomeResult, Report, RequestOutcome, ThroughputStats};

use super::stats::{latency_stats, micros_to_secs, ratio};

/// Inputs of a report besides the outcomes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportParams {
    pub test_id: String,
    /// Width of the throughput buckets.
    pub time_step: Duration,
    /// TTFT ceiling counted as meeting the SLO.
    pub slo_ttft: Duration,
    pub rejected_requests: u64,
    /// Set when the report covers a run that failed.
    pub partial: bool,
}

#[derive(Debug, Default)]
struct Counts {
    successful: u64,
    timeout: u64,
    transport: u64,
    protocol: u64,
    tokens: u64,
    within_slo: u64,
}

/// Builds the report of a finished (or failed) run.
///
/// Outcomes are sorted by `(sent_at, request_id)` first, so the result does
/// not depend on the order the log was read in.
#[must_use]
pub fn build_report(outcomes: &[RequestOutcome], params: &ReportParams) -> Report {
    let mut ordered: Vec<&RequestOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|outcome| (outcome.sent_at_us, outcome.request_id));

    let slo_us = duration_us(params.slo_ttft);
    let mut counts = Counts::default();
    let mut ttft_samples = Vec::new();
    let mut tpot_samples = Vec::new();

    for outcome in &ordered {
        match outcome.result {
            OutcomeResult::Success => {}
            OutcomeResult::Timeout => counts.timeout = counts.timeout.saturating_add(1),
            OutcomeResult::TransportError => {
                counts.transport = counts.transport.saturating_add(1);
            }
            OutcomeResult::ProtocolError => {
                counts.protocol = counts.protocol.saturating_add(1);
            }
        }

        if outcome.is_successful() {
            counts.successful = counts.successful.saturating_add(1);
            counts.tokens = counts.tokens.saturating_add(outcome.token_count);
            if let Some(ttft) = outcome.ttft_us() {
                ttft_samples.push(ttft);
                if ttft <= slo_us {
                    counts.within_slo = counts.within_slo.saturating_add(1);
                }
            }
            if let Some(tpot) = outcome.tpot_us() {
                tpot_samples.push(tpot);
            }
        } else if outcome.is_partial_timeout()
            && let Some(ttft) = outcome.ttft_us()
        {
            ttft_samples.push(ttft);
        }
    }

    let total = ordered.len() as u64;
    let start_us = ordered.first().map_or(0, |outcome| outcome.sent_at_us);
    let end_us = ordered
        .iter()
        .map(|outcome| outcome.completed_at_us)
        .max()
        .unwrap_or(start_us);
    let duration_us = end_us.saturating_sub(start_us);

    let throughput = ThroughputStats {
        avg: ratio(
            u128::from(counts.tokens).saturating_mul(1_000_000),
            u128::from(duration_us),
        ),
        p95: bucket_rate_p95(&ordered, start_us, duration_us, params.time_step),
    };

    Report {
        test_id: params.test_id.clone(),
        total_requests: total,
        successful_requests: counts.successful,
        timeout_requests: counts.timeout,
        transport_error_requests: counts.transport,
        protocol_error_requests: counts.protocol,
        rejected_requests: params.rejected_requests,
        fail_rate: ratio(
            u128::from(total.saturating_sub(counts.successful)),
            u128::from(total),
        ),
        ttft_stats: latency_stats(&mut ttft_samples),
        tpot_stats: latency_stats(&mut tpot_samples),
        throughput,
        slo_attainment: ratio(u128::from(counts.within_slo), u128::from(counts.successful)),
        slo_ttft: params.slo_ttft.as_secs_f64(),
        total_tokens: counts.tokens,
        total_duration: micros_to_secs(duration_us),
        requests_per_second: ratio(
            u128::from(total).saturating_mul(1_000_000),
            u128::from(duration_us),
        ),
        time_step: params.time_step.as_secs_f64(),
        partial: params.partial,
    }
}

/// p95 of tokens/s across `time_step` buckets spanning the run. Buckets with
/// no tokens count as zero-rate samples.
fn bucket_rate_p95(
    ordered: &[&RequestOutcome],
    start_us: u64,
    duration_us: u64,
    time_step: Duration,
) -> f64 {
    let step_us = duration_us_nonzero(time_step);
    if duration_us == 0 {
        return 0.0;
    }
    let bucket_count = duration_us.div_ceil(step_us);

    let mut filled: BTreeMap<u64, u64> = BTreeMap::new();
    for outcome in ordered.iter().filter(|outcome| outcome.is_successful()) {
        for &at in &outcome.token_arrival_us {
            let bucket = at.saturating_sub(start_us).checked_div(step_us).unwrap_or(0);
            let bucket = bucket.min(bucket_count.saturating_sub(1));
            let slot = filled.entry(bucket).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }

    let empty = bucket_count.saturating_sub(filled.len() as u64);
    let mut counts: Vec<u64> = Vec::with_capacity(filled.len());
    counts.extend(filled.into_values());
    counts.sort_unstable();
    // Zero buckets sort first; the rank is taken over every bucket.
    let rank_count = empty.saturating_add(counts.len() as u64);
    let rank = 95_u64.saturating_mul(rank_count).saturating_add(99) / 100;
    let p95_count = if rank <= empty {
        0
    } else {
        let index = usize::try_from(rank.saturating_sub(empty).saturating_sub(1)).unwrap_or(0);
        counts.get(index).copied().unwrap_or(0)
    };

    ratio(
        u128::from(p95_count).saturating_mul(1_000_000),
        u128::from(step_us),
    )
}

fn duration_us(value: Duration) -> u64 {
    u64::try_from(value.as_micros()).unwrap_or(u64::MAX)
}

fn duration_us_nonzero(value: Duration) -> u64 {
    duration_us(value).max(1)
}
