use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use crate::args::{Cli, Command, ReportArgs, RunArgs, ServeArgs};
use crate::config::types::ServerConfigFile;
use crate::config::{
    DatabaseLocation, load_config, load_registration_file, resolve_run_settings,
    resolve_serve_settings,
};
use crate::control::{bind_control, serve_control};
use crate::coordinator::Coordinator;
use crate::domain::{Report, TestId, TestState, TestStatus};
use crate::error::{AppError, AppResult, CoordinatorError};
use crate::prompts::DatasetDirectory;
use crate::shutdown::{setup_signal_shutdown_handler, shutdown_channel};
use crate::store::{Database, JsonReportSink, read_report_file};

/// Parses the command line and runs the selected subcommand.
///
/// # Errors
///
/// Returns the first error of the subcommand.
pub fn run() -> AppResult<()> {
    let cli = Cli::parse();
    crate::logger::init_logging(cli.verbose, cli.no_color);

    let file = load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Command::Serve(args) => serve(&args, file.as_ref()).await,
            Command::Run(args) => run_once(&args, file.as_ref()).await,
            Command::Report(args) => show_report(&args).await,
        }
    })
}

async fn serve(args: &ServeArgs, file: Option<&ServerConfigFile>) -> AppResult<()> {
    let settings = resolve_serve_settings(args, file)?;
    let db = Database::open(&settings.database).await?;
    info!("Using database {}.", settings.database.display());
    let coordinator = Coordinator::open(
        db,
        Arc::new(DatasetDirectory::new(settings.datasets_dir)),
        Arc::new(JsonReportSink::new(settings.reports_dir)),
    )
    .await?;

    let listener = bind_control(settings.listen).await?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    serve_control(listener, coordinator.clone(), shutdown_rx).await;
    coordinator.shutdown(settings.shutdown_grace).await;
    signal_handle.abort();
    Ok(())
}

async fn run_once(args: &RunArgs, file: Option<&ServerConfigFile>) -> AppResult<()> {
    let settings = resolve_run_settings(args, file);
    let request = load_registration_file(&args.test_file)?;
    let db = match &settings.database {
        DatabaseLocation::File(path) => {
            info!("Recording the run in {}.", path.display());
            Database::open(path).await?
        }
        DatabaseLocation::InMemory => {
            warn!("Keeping the run in memory; only the report artifact will remain.");
            Database::open_in_memory().await?
        }
    };
    let coordinator = Coordinator::open(
        db,
        Arc::new(DatasetDirectory::new(settings.datasets_dir)),
        Arc::new(JsonReportSink::new(settings.reports_dir)),
    )
    .await?;

    let id = coordinator.register(&request).await?;
    coordinator.start(&id).await?;

    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);
    let waited = tokio::select! {
        waited = coordinator.wait_for(&id, args.wait_timeout) => waited,
        _ = shutdown_rx.recv() => {
            info!("Interrupted; stopping test {}.", id);
            stop_and_settle(&coordinator, &id).await
        }
    };
    signal_handle.abort();

    let state = match waited {
        Ok(state) => state,
        Err(AppError::Coordinator(CoordinatorError::WaitTimeout { .. })) => {
            warn!("Test {} did not settle in time; stopping it.", id);
            stop_and_settle(&coordinator, &id).await?
        }
        Err(err) => return Err(err),
    };

    if state.status == TestStatus::Failed
        && let Some(reason) = state.error.as_deref()
    {
        error!("Test {} failed: {}", id, reason);
    }
    let partial = args.partial && state.status == TestStatus::Failed;
    let report = coordinator.report(&id, partial).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn stop_and_settle(coordinator: &Coordinator, id: &TestId) -> AppResult<TestState> {
    if let Err(err) = coordinator.stop(id).await {
        // The run may have settled on its own in the meantime.
        info!("Stop of {} skipped: {}", id, err);
    }
    coordinator.wait_for(id, None).await
}

async fn show_report(args: &ReportArgs) -> AppResult<()> {
    let report = read_report_file(&args.path).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &Report) {
    let partial = if report.partial { " (partial)" } else { "" };
    println!("Test {}{}", report.test_id, partial);
    println!(
        "Requests: {} total, {} successful, {} timeout, {} transport error, {} protocol error, {} rejected",
        report.total_requests,
        report.successful_requests,
        report.timeout_requests,
        report.transport_error_requests,
        report.protocol_error_requests,
        report.rejected_requests
    );
    println!("Fail rate: {:.4}", report.fail_rate);
    println!(
        "TTFT (s): min {:.4} avg {:.4} p95 {:.4} max {:.4}",
        report.ttft_stats.min, report.ttft_stats.avg, report.ttft_stats.p95, report.ttft_stats.max
    );
    println!(
        "TPOT (s): min {:.4} avg {:.4} p95 {:.4} max {:.4}",
        report.tpot_stats.min, report.tpot_stats.avg, report.tpot_stats.p95, report.tpot_stats.max
    );
    println!(
        "Throughput (tok/s): avg {:.2} p95 {:.2}",
        report.throughput.avg, report.throughput.p95
    );
    println!(
        "SLO attainment (TTFT <= {:.3}s): {:.4}",
        report.slo_ttft, report.slo_attainment
    );
    println!(
        "Tokens: {} over {:.2}s ({:.2} req/s)",
        report.total_tokens, report.total_duration, report.requests_per_second
    );
}
