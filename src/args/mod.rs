//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod defaults;
pub(crate) mod parsers;


pub use cli::{Cli, Command, ReportArgs, RunArgs, ServeArgs};
