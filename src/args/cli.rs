use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::parsers::parse_duration_arg;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Load-test engine for LLM inference endpoints: arrival-rule driven traffic, per-token timing, TTFT/TPOT/throughput reports."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (overridden by SERVEBENCH_LOG / RUST_LOG)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Path to a servebench.toml / servebench.json config file
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the HTTP control API and execute registered tests
    Serve(ServeArgs),
    /// Register one test from a JSON file, run it to completion and print its report
    Run(RunArgs),
    /// Print a saved report artifact
    Report(ReportArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ServeArgs {
    /// Address the control API listens on (default 127.0.0.1:8080)
    #[arg(long = "listen")]
    pub listen: Option<String>,

    /// SQLite database holding the registry and outcome logs
    #[arg(long = "database")]
    pub database: Option<PathBuf>,

    /// Directory report artifacts are written to
    #[arg(long = "reports-dir")]
    pub reports_dir: Option<PathBuf>,

    /// Directory prompt corpora are read from (<name>.jsonl or <name>.txt)
    #[arg(long = "datasets-dir")]
    pub datasets_dir: Option<PathBuf>,

    /// How long a running test may take to settle on shutdown (supports ms/s/m/h)
    #[arg(long = "shutdown-grace", value_parser = parse_duration_arg)]
    pub shutdown_grace: Option<Duration>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// JSON registration payload describing the test
    pub test_file: PathBuf,

    /// SQLite database to record the test in (defaults to the server's)
    #[arg(long = "database")]
    pub database: Option<PathBuf>,

    /// Keep the registry and outcome log in memory; only the report survives
    #[arg(long = "in-memory", conflicts_with = "database")]
    pub in_memory: bool,

    /// Directory the report artifact is written to
    #[arg(long = "reports-dir")]
    pub reports_dir: Option<PathBuf>,

    /// Directory prompt corpora are read from
    #[arg(long = "datasets-dir")]
    pub datasets_dir: Option<PathBuf>,

    /// Give up waiting for the run after this long (supports ms/s/m/h)
    #[arg(long = "wait-timeout", value_parser = parse_duration_arg)]
    pub wait_timeout: Option<Duration>,

    /// Print the report of a failed run, flagged partial
    #[arg(long = "partial")]
    pub partial: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    /// Path to a report_<id>.json artifact
    pub path: PathBuf,

    /// Print the raw JSON instead of the summary
    #[arg(long = "json")]
    pub json: bool,
}
