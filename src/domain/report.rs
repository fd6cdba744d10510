use serde::{Deserialize, Serialize};

/// Summary statistics in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std: f64,
    #[serde(rename = "95_percentile")]
    pub p95: f64,
}

/// Aggregate tokens per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub avg: f64,
    #[serde(rename = "95_percentile")]
    pub p95: f64,
}

/// Derived report of one test; reproducible from its outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub test_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub timeout_requests: u64,
    pub transport_error_requests: u64,
    pub protocol_error_requests: u64,
    pub rejected_requests: u64,
    pub fail_rate: f64,
    pub ttft_stats: LatencyStats,
    pub tpot_stats: LatencyStats,
    pub throughput: ThroughputStats,
    pub slo_attainment: f64,
    pub slo_ttft: f64,
    pub total_tokens: u64,
    pub total_duration: f64,
    pub requests_per_second: f64,
    pub time_step: f64,
    pub partial: bool,
}
