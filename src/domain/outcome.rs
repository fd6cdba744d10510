use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeResult {
    Success,
    Timeout,
    TransportError,
    ProtocolError,
}

impl OutcomeResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OutcomeResult::Success => "SUCCESS",
            OutcomeResult::Timeout => "TIMEOUT",
            OutcomeResult::TransportError => "TRANSPORT_ERROR",
            OutcomeResult::ProtocolError => "PROTOCOL_ERROR",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(OutcomeResult::Success),
            "TIMEOUT" => Some(OutcomeResult::Timeout),
            "TRANSPORT_ERROR" => Some(OutcomeResult::TransportError),
            "PROTOCOL_ERROR" => Some(OutcomeResult::ProtocolError),
            _ => None,
        }
    }
}

/// Recorded result of one dispatched request.
///
/// `scheduled_at_us` is the virtual-clock offset from the start of the run;
/// every other instant is wall-clock microseconds since the UNIX epoch.
/// `token_arrival_us` includes the first token, so `first_token_at_us` is
/// `None` exactly when it is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub request_id: u64,
    pub scheduled_at_us: u64,
    pub sent_at_us: u64,
    pub first_token_at_us: Option<u64>,
    pub token_arrival_us: Vec<u64>,
    pub completed_at_us: u64,
    pub result: OutcomeResult,
    pub token_count: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Successful for aggregation purposes: a clean finish with output.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.result == OutcomeResult::Success && self.token_count > 0
    }

    /// Timed out after streaming at least one token.
    #[must_use]
    pub fn is_partial_timeout(&self) -> bool {
        self.result == OutcomeResult::Timeout && self.first_token_at_us.is_some()
    }

    #[must_use]
    pub fn ttft_us(&self) -> Option<u64> {
        self.first_token_at_us
            .map(|first| first.saturating_sub(self.sent_at_us))
    }

    /// Mean of consecutive inter-token deltas; needs at least two tokens.
    #[must_use]
    pub fn tpot_us(&self) -> Option<u64> {
        let (first, last) = match self.token_arrival_us.as_slice() {
            [first, .., last] => (*first, *last),
            _ => return None,
        };
        let gaps = u64::try_from(self.token_arrival_us.len().saturating_sub(1)).ok()?;
        last.saturating_sub(first).checked_div(gaps)
    }
}
