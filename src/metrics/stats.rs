use std::time::Duration;

use crate::domain::LatencyStats;

/// `numerator / denominator`, or 0 when the denominator is 0.
#[expect(
    clippy::float_arithmetic,
    reason = "final conversion of exact integer aggregates into report ratios"
)]
pub(super) fn ratio(numerator: u128, denominator: u128) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

pub(super) fn micros_to_secs(micros: u64) -> f64 {
    Duration::from_micros(micros).as_secs_f64()
}

/// Nearest-rank percentile of sorted samples: the value at rank
/// `ceil(p * n / 100)`.
pub(super) fn nearest_rank(sorted: &[u64], percentile: u64) -> u64 {
    let count = sorted.len() as u64;
    if count == 0 {
        return 0;
    }
    let rank = percentile
        .saturating_mul(count)
        .saturating_add(99)
        / 100;
    let index = usize::try_from(rank.clamp(1, count).saturating_sub(1)).unwrap_or(0);
    sorted.get(index).copied().unwrap_or(0)
}

/// Min, max, mean, population std and p95 of microsecond samples, reported
/// in seconds. Empty input yields all zeros.
pub(super) fn latency_stats(samples: &mut [u64]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }
    samples.sort_unstable();

    let count = samples.len() as u128;
    let (sum, sum_sq) = samples.iter().fold((0_u128, 0_u128), |(sum, sum_sq), &value| {
        let value = u128::from(value);
        (
            sum.saturating_add(value),
            sum_sq.saturating_add(value.saturating_mul(value)),
        )
    });
    // n * sum(x^2) - sum(x)^2 == n^2 * variance, exact in integers.
    let scaled_variance = count.saturating_mul(sum_sq).saturating_sub(sum.saturating_mul(sum));
    let scaled_std = scaled_variance.isqrt();

    LatencyStats {
        min: micros_to_secs(samples.first().copied().unwrap_or(0)),
        max: micros_to_secs(samples.last().copied().unwrap_or(0)),
        avg: ratio(sum, count.saturating_mul(1_000_000)),
        std: ratio(scaled_std, count.saturating_mul(1_000_000)),
        p95: micros_to_secs(nearest_rank(samples, 95)),
    }
}
