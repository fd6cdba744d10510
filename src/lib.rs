//! Core library for the `servebench` CLI.
//!
//! Registers load tests against LLM inference endpoints, drives their
//! arrival rules, records per-token timing of every streamed response and
//! derives TTFT/TPOT/throughput reports. The binary exposes it as a control
//! API server (`serve`), a one-shot runner (`run`) and a report viewer
//! (`report`).
pub mod args;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod dispatch;
pub mod domain;
pub mod entry;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod prompts;
pub mod schedule;
pub mod shutdown;
pub mod store;

#[cfg(feature = "fuzzing")]
pub mod fuzzing;
