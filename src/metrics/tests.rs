use std::time::Duration;

use super::stats::nearest_rank;
use super::{ReportParams, build_report, requests_status, throughput_series};
use crate::domain::{OutcomeResult, Report, RequestOutcome};

fn outcome(
    request_id: u64,
    sent_at_us: u64,
    tokens: &[u64],
    completed_at_us: u64,
    result: OutcomeResult,
) -> RequestOutcome {
    RequestOutcome {
        request_id,
        scheduled_at_us: 0,
        sent_at_us,
        first_token_at_us: tokens.first().copied(),
        token_arrival_us: tokens.to_vec(),
        completed_at_us,
        result,
        token_count: tokens.len() as u64,
        status_code: Some(200),
        error: None,
    }
}

fn params() -> ReportParams {
    ReportParams {
        test_id: "t-1".to_owned(),
        time_step: Duration::from_millis(100),
        slo_ttft: Duration::from_millis(150),
        rejected_requests: 0,
        partial: false,
    }
}

fn close(actual: f64, expected: f64) -> bool {
    let scale = expected.abs().max(1.0);
    #[expect(clippy::float_arithmetic, reason = "tolerance check in tests")]
    let diff = (actual - expected).abs() / scale;
    diff < 1e-9
}

fn check(label: &str, actual: f64, expected: f64) -> Result<(), String> {
    if close(actual, expected) {
        Ok(())
    } else {
        Err(format!("{}: expected {}, got {}", label, expected, actual))
    }
}

#[test]
fn empty_log_reports_zeros() -> Result<(), String> {
    let report = build_report(&[], &params());
    if report.total_requests != 0 || report.successful_requests != 0 {
        return Err(format!("Unexpected counts: {:?}", report));
    }
    check("fail_rate", report.fail_rate, 0.0)?;
    check("ttft avg", report.ttft_stats.avg, 0.0)?;
    check("throughput", report.throughput.avg, 0.0)?;
    check("rps", report.requests_per_second, 0.0)?;
    check("duration", report.total_duration, 0.0)
}

#[test]
fn single_stream_produces_exact_stats() -> Result<(), String> {
    let report = build_report(
        &[outcome(
            1,
            1_000_000,
            &[1_200_000, 1_250_000, 1_300_000],
            1_300_000,
            OutcomeResult::Success,
        )],
        &params(),
    );
    check("ttft min", report.ttft_stats.min, 0.2)?;
    check("ttft max", report.ttft_stats.max, 0.2)?;
    check("ttft p95", report.ttft_stats.p95, 0.2)?;
    check("ttft std", report.ttft_stats.std, 0.0)?;
    check("tpot avg", report.tpot_stats.avg, 0.05)?;
    check("duration", report.total_duration, 0.3)?;
    check("throughput", report.throughput.avg, 10.0)?;
    check("rps", report.requests_per_second, 1.0 / 0.3)?;
    if report.total_tokens != 3 || report.fail_rate != 0.0 {
        return Err(format!("Unexpected totals: {:?}", report));
    }
    Ok(())
}

#[test]
fn partial_timeouts_count_for_ttft_only() -> Result<(), String> {
    let outcomes = [
        outcome(
            1,
            0,
            &[100_000, 150_000, 200_000],
            200_000,
            OutcomeResult::Success,
        ),
        outcome(2, 0, &[300_000], 1_000_000, OutcomeResult::Timeout),
        outcome(3, 0, &[], 1_000_000, OutcomeResult::Timeout),
        outcome(4, 0, &[], 10_000, OutcomeResult::TransportError),
    ];
    let report = build_report(&outcomes, &params());

    if report.successful_requests != 1
        || report.timeout_requests != 2
        || report.transport_error_requests != 1
    {
        return Err(format!("Unexpected counts: {:?}", report));
    }
    check("fail_rate", report.fail_rate, 0.75)?;
    check("ttft min", report.ttft_stats.min, 0.1)?;
    check("ttft max", report.ttft_stats.max, 0.3)?;
    check("ttft avg", report.ttft_stats.avg, 0.2)?;
    check("ttft std", report.ttft_stats.std, 0.1)?;
    check("tpot min", report.tpot_stats.min, 0.05)?;
    check("tpot max", report.tpot_stats.max, 0.05)?;
    if report.total_tokens != 3 {
        return Err(format!("Timeout tokens leaked into throughput: {}", report.total_tokens));
    }
    Ok(())
}

#[test]
fn success_without_tokens_is_a_failure() -> Result<(), String> {
    let report = build_report(
        &[outcome(1, 0, &[], 50_000, OutcomeResult::Success)],
        &params(),
    );
    if report.successful_requests != 0 {
        return Err("Empty success must not count as successful".to_owned());
    }
    check("fail_rate", report.fail_rate, 1.0)
}

#[test]
fn slo_attainment_counts_successes_within_ceiling() -> Result<(), String> {
    let outcomes = [
        outcome(1, 0, &[100_000], 100_000, OutcomeResult::Success),
        outcome(2, 0, &[200_000], 200_000, OutcomeResult::Success),
        outcome(3, 0, &[], 300_000, OutcomeResult::ProtocolError),
    ];
    let report = build_report(&outcomes, &params());
    check("slo_attainment", report.slo_attainment, 0.5)?;
    check("slo_ttft", report.slo_ttft, 0.15)
}

#[test]
fn throughput_p95_uses_time_step_buckets() -> Result<(), String> {
    let outcomes = [
        outcome(
            1,
            0,
            &[10_000, 20_000, 30_000, 150_000],
            1_000_000,
            OutcomeResult::Success,
        ),
    ];
    let report = build_report(&outcomes, &params());
    check("throughput avg", report.throughput.avg, 4.0)?;
    check("throughput p95", report.throughput.p95, 30.0)
}

#[test]
fn report_is_independent_of_log_order() -> Result<(), String> {
    let mut outcomes: Vec<RequestOutcome> = (0..20_u64)
        .map(|id| {
            let sent = id.saturating_mul(50_000);
            outcome(
                id,
                sent,
                &[sent.saturating_add(80_000), sent.saturating_add(120_000)],
                sent.saturating_add(120_000),
                if id % 7 == 0 {
                    OutcomeResult::Timeout
                } else {
                    OutcomeResult::Success
                },
            )
        })
        .collect();
    let forward: Report = build_report(&outcomes, &params());
    outcomes.reverse();
    outcomes.swap(3, 11);
    let shuffled = build_report(&outcomes, &params());
    if forward != shuffled {
        return Err(format!("Reports differ:\n{:?}\n{:?}", forward, shuffled));
    }
    Ok(())
}

#[test]
fn nearest_rank_percentiles() -> Result<(), String> {
    let hundred: Vec<u64> = (1..=100).collect();
    let cases: [(&[u64], u64); 4] = [(&hundred, 95), (&[7], 7), (&[10, 20], 20), (&[], 0)];
    for (samples, expected) in cases {
        let actual = nearest_rank(samples, 95);
        if actual != expected {
            return Err(format!("p95 of {:?}: expected {}, got {}", samples, expected, actual));
        }
    }
    Ok(())
}

#[test]
fn population_std_of_two_samples() -> Result<(), String> {
    let outcomes = [
        outcome(1, 0, &[1_000_000], 1_000_000, OutcomeResult::Success),
        outcome(2, 0, &[3_000_000], 3_000_000, OutcomeResult::Success),
    ];
    let report = build_report(&outcomes, &params());
    check("ttft avg", report.ttft_stats.avg, 2.0)?;
    check("ttft std", report.ttft_stats.std, 1.0)?;
    check("ttft p95", report.ttft_stats.p95, 3.0)
}

#[test]
fn requests_status_accumulates_per_interval() -> Result<(), String> {
    let mut timed_out = outcome(2, 1_000_200_000, &[], 1_002_500_000, OutcomeResult::Timeout);
    timed_out.status_code = None;
    let outcomes = [
        outcome(1, 1_000_000_000, &[1_000_500_000], 1_001_500_000, OutcomeResult::Success),
        timed_out,
        outcome(
            3,
            1_001_200_000,
            &[1_001_300_000],
            1_001_400_000,
            OutcomeResult::Success,
        ),
    ];
    let series = requests_status("t-1", &outcomes, Duration::from_secs(1));
    check("interval", series.interval, 1.0)?;
    let got: Vec<(u64, u64, u64)> = series
        .points
        .iter()
        .map(|point| (point.in_progress, point.succeeded, point.failed))
        .collect();
    if got != [(2, 0, 0), (1, 2, 0), (0, 2, 1)] {
        return Err(format!("Unexpected status points: {:?}", got));
    }
    let last = series.points.last().ok_or("no points")?;
    check("last t", last.t, 2.0)?;

    let empty = requests_status("t-1", &[], Duration::from_secs(1));
    if !empty.points.is_empty() {
        return Err("Empty log should have no points".to_owned());
    }
    Ok(())
}

#[test]
fn throughput_series_uses_a_centred_window() -> Result<(), String> {
    let outcomes = [
        outcome(
            1,
            5_000_000,
            &[5_000_000, 6_000_000],
            6_000_000,
            OutcomeResult::Success,
        ),
        outcome(
            2,
            5_000_000,
            &[7_000_000, 7_500_000],
            7_600_000,
            OutcomeResult::Success,
        ),
    ];
    let series = throughput_series(
        "t-1",
        &outcomes,
        Duration::from_secs(1),
        Duration::from_secs(2),
    );
    check("window", series.window, 2.0)?;
    let expected = [(0.0, 1.0), (1.0, 1.5), (2.0, 1.5), (3.0, 1.0)];
    if series.points.len() != expected.len() {
        return Err(format!("Unexpected points: {:?}", series.points));
    }
    for (point, (t, rate)) in series.points.iter().zip(expected) {
        check("t", point.t, t)?;
        check("tokens_per_second", point.tokens_per_second, rate)?;
    }
    Ok(())
}
