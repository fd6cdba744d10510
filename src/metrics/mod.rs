//! Metrics aggregation: reduces an outcome log into a [`Report`] and the
//! time series behind its charts.
//!
//! Everything here is a pure function of the outcomes and parameters. All
//! arithmetic runs on integer microseconds; floats appear only in the final
//! report fields.
mod report;
mod series;
mod stats;

#[cfg(test)]
mod tests;

pub use report::{ReportParams, build_report};
pub use series::{
    RequestsStatusSeries, STATUS_INTERVAL, StatusPoint, THROUGHPUT_WINDOW, ThroughputPoint,
    ThroughputSeries, requests_status, throughput_series,
};
