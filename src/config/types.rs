use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Registration payload as accepted by the control API and `run` files.
///
/// Every field is optional at the serde level; `validate_registration`
/// decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationRequest {
    pub url: Option<String>,
    pub model: Option<String>,
    pub dataset_name: Option<String>,
    pub endpoint_type: Option<String>,
    pub key: Option<String>,
    pub legacy: Option<bool>,
    /// Seconds.
    pub max_run_time: Option<f64>,
    pub random_seed: Option<u64>,
    pub dataset_config: DatasetConfig,
    pub kwargs: RequestKwargs,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Arrival rule text.
    pub func: Option<String>,
    pub random_seed: Option<u64>,
    pub prompt_source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestKwargs {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Seconds.
    pub request_timeout: Option<f64>,
    /// Minutes.
    pub skip_idle_min: Option<f64>,
    /// Seconds.
    pub time_step: Option<f64>,
    pub hf_auth_key: Option<String>,
    /// Seconds.
    pub slo_ttft: Option<f64>,
    pub max_in_flight: Option<usize>,
    pub admission: Option<String>,
    pub drain_policy: Option<String>,
}

/// Optional `servebench.toml` / `servebench.json` server settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfigFile {
    pub listen: Option<String>,
    pub database: Option<String>,
    pub reports_dir: Option<String>,
    pub datasets_dir: Option<String>,
    pub shutdown_grace: Option<DurationValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(0) => Err(ConfigError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }
}
