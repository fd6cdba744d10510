use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult, ConfigError};

use super::types::{RegistrationRequest, ServerConfigFile};

const DEFAULT_TOML: &str = "servebench.toml";
const DEFAULT_JSON: &str = "servebench.json";

/// Loads the server configuration file from the provided path or the
/// default locations in the working directory.
///
/// # Errors
///
/// Returns an error when the config file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> AppResult<Option<ServerConfigFile>> {
    if let Some(path) = path {
        return Ok(Some(load_config_file(path)?));
    }

    for candidate in [DEFAULT_TOML, DEFAULT_JSON] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(Some(load_config_file(&path)?));
        }
    }

    Ok(None)
}

pub(crate) fn load_config_file(path: &Path) -> AppResult<ServerConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}

/// Reads a JSON registration payload from disk, as used by `servebench run`.
///
/// # Errors
///
/// Returns an error when the file cannot be read or is not a registration
/// object.
pub fn load_registration_file(path: &Path) -> AppResult<RegistrationRequest> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadTestFile {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::config(ConfigError::ParseTestFile {
            path: path.to_path_buf(),
            source: err,
        })
    })
}
