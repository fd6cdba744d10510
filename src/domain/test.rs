use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a registered test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Registered,
    Running,
    Completed,
    Failed,
}

impl TestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TestStatus::Registered => "REGISTERED",
            TestStatus::Running => "RUNNING",
            TestStatus::Completed => "COMPLETED",
            TestStatus::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "REGISTERED" => Some(TestStatus::Registered),
            "RUNNING" => Some(TestStatus::Running),
            "COMPLETED" => Some(TestStatus::Completed),
            "FAILED" => Some(TestStatus::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Failed)
    }
}

/// Mutable lifecycle state of one test. Timestamps are microseconds since
/// the UNIX epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestState {
    pub status: TestStatus,
    pub registered_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub error: Option<String>,
    pub stop_requested: bool,
    pub rejected_requests: u64,
    /// SHA-256 over the requests the run generated; set once it settles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_hash: Option<String>,
}

impl TestState {
    #[must_use]
    pub const fn registered(registered_at: u64) -> Self {
        Self {
            status: TestStatus::Registered,
            registered_at,
            started_at: None,
            ended_at: None,
            error: None,
            stop_requested: false,
            rejected_requests: 0,
            workload_hash: None,
        }
    }
}

/// Sampling parameters forwarded verbatim to the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// What the scheduling loop does with a due request when `max_in_flight`
/// dispatches are already outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Admission {
    /// Wait for a slot; later sends are delayed.
    #[default]
    Queue,
    /// Skip the request and count it as rejected.
    Reject,
}

impl Admission {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Admission::Queue => "queue",
            Admission::Reject => "reject",
        }
    }
}

/// What happens to in-flight dispatches when a running test is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Let each request finish or hit its own timeout.
    #[default]
    Drain,
    /// Cancel outstanding requests and record them as aborted.
    Abort,
}

impl DrainPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DrainPolicy::Drain => "drain",
            DrainPolicy::Abort => "abort",
        }
    }
}

/// Validated, immutable description of one load test.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub id: TestId,
    pub endpoint_url: url::Url,
    pub model_name: String,
    pub endpoint_type: String,
    pub dataset_name: String,
    /// Corpus actually sampled for prompts (differs from `dataset_name` for
    /// the synthesizer dataset).
    pub prompt_source: String,
    pub arrival_rule: crate::schedule::ArrivalRule,
    pub random_seed: Option<u64>,
    pub generation_params: GenerationParams,
    pub request_timeout: Duration,
    pub skip_idle_threshold: Duration,
    pub report_time_step: Duration,
    pub max_run_time: Option<Duration>,
    pub slo_ttft: Duration,
    pub max_in_flight: Option<usize>,
    pub admission: Admission,
    pub drain_policy: DrainPolicy,
    pub legacy: bool,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
}
