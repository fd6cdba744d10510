//! Core entities shared by the scheduler, dispatcher, recorder, aggregator
//! and coordinator.
mod outcome;
mod report;
mod test;

pub use outcome::{OutcomeResult, RequestOutcome};
pub use report::{LatencyStats, Report, ThroughputStats};
pub use test::{
    Admission, DrainPolicy, GenerationParams, TestConfig, TestId, TestState, TestStatus,
};

#[cfg(test)]
pub(crate) mod test_support;
