use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::args::defaults::{
    DEFAULT_LISTEN, DEFAULT_SHUTDOWN_GRACE, default_database_path, default_datasets_dir,
    default_reports_dir,
};
use crate::args::{RunArgs, ServeArgs};
use crate::error::{AppError, AppResult, ConfigError};

use super::types::ServerConfigFile;

/// Fully resolved settings for `servebench serve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub database: PathBuf,
    pub reports_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub shutdown_grace: Duration,
}

/// Where `servebench run` keeps its registry and outcome log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    InMemory,
}

/// Fully resolved settings for `servebench run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub database: DatabaseLocation,
    pub reports_dir: PathBuf,
    pub datasets_dir: PathBuf,
}

/// Merges CLI flags over the optional config file; CLI values win.
///
/// # Errors
///
/// Returns an error when the listen address or a duration is invalid.
pub fn resolve_serve_settings(
    args: &ServeArgs,
    file: Option<&ServerConfigFile>,
) -> AppResult<ServerSettings> {
    let listen_raw = args
        .listen
        .clone()
        .or_else(|| file.and_then(|file| file.listen.clone()));
    let listen = match listen_raw {
        Some(raw) => raw.trim().parse().map_err(|source| {
            AppError::config(ConfigError::InvalidListen {
                value: raw.clone(),
                source,
            })
        })?,
        None => DEFAULT_LISTEN,
    };

    let file_grace = file.and_then(|file| file.shutdown_grace.as_ref());
    let shutdown_grace = match (args.shutdown_grace, file_grace) {
        (Some(grace), _) => grace,
        (None, Some(value)) => value.to_duration().map_err(AppError::config)?,
        (None, None) => DEFAULT_SHUTDOWN_GRACE,
    };

    Ok(ServerSettings {
        listen,
        database: pick_path(
            args.database.as_ref(),
            file.and_then(|file| file.database.as_deref()),
        )
        .unwrap_or_else(default_database_path),
        reports_dir: pick_path(
            args.reports_dir.as_ref(),
            file.and_then(|file| file.reports_dir.as_deref()),
        )
        .unwrap_or_else(default_reports_dir),
        datasets_dir: pick_path(
            args.datasets_dir.as_ref(),
            file.and_then(|file| file.datasets_dir.as_deref()),
        )
        .unwrap_or_else(default_datasets_dir),
        shutdown_grace,
    })
}

/// Same merge for a one-shot run. The run is recorded in the same database
/// as `serve` unless `--in-memory` is given.
#[must_use]
pub fn resolve_run_settings(args: &RunArgs, file: Option<&ServerConfigFile>) -> RunSettings {
    let database = if args.in_memory {
        DatabaseLocation::InMemory
    } else {
        DatabaseLocation::File(
            pick_path(
                args.database.as_ref(),
                file.and_then(|file| file.database.as_deref()),
            )
            .unwrap_or_else(default_database_path),
        )
    };
    RunSettings {
        database,
        reports_dir: pick_path(
            args.reports_dir.as_ref(),
            file.and_then(|file| file.reports_dir.as_deref()),
        )
        .unwrap_or_else(default_reports_dir),
        datasets_dir: pick_path(
            args.datasets_dir.as_ref(),
            file.and_then(|file| file.datasets_dir.as_deref()),
        )
        .unwrap_or_else(default_datasets_dir),
    }
}

fn pick_path(cli: Option<&PathBuf>, file: Option<&str>) -> Option<PathBuf> {
    cli.cloned().or_else(|| file.map(PathBuf::from))
}
