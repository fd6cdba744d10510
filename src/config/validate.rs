use std::time::Duration;

use tokio::sync::Semaphore;
use url::Url;

use crate::dispatch::{EndpointDialect, SUPPORTED_DIALECTS};
use crate::domain::{Admission, DrainPolicy, GenerationParams, TestConfig, TestId};
use crate::error::ValidationError;
use crate::schedule::ArrivalRule;

use super::types::RegistrationRequest;

pub(crate) const DEFAULT_ENDPOINT_TYPE: &str = "openai";
pub(crate) const SYNTHESIZER_DATASET: &str = "synthesizer";
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 300.0;
const MAX_REQUEST_TIMEOUT_SECS: f64 = 86_400.0;
const DEFAULT_SKIP_IDLE_MIN: f64 = 5.0;
const DEFAULT_TIME_STEP_SECS: f64 = 0.1;
const MIN_TIME_STEP_SECS: f64 = 0.001;
const MAX_TIME_STEP_SECS: f64 = 3600.0;
const DEFAULT_SLO_TTFT_SECS: f64 = 1.0;

/// Turns a registration payload into an immutable [`TestConfig`].
///
/// # Errors
///
/// Returns the first rule the payload violates. Nothing is created on error.
pub fn validate_registration(
    request: &RegistrationRequest,
    id: TestId,
) -> Result<TestConfig, ValidationError> {
    let endpoint_url = validate_url(request.url.as_deref())?;

    let model_name = match request.model.as_deref().map(str::trim) {
        Some(model) if !model.is_empty() => model.to_owned(),
        Some(_) | None => return Err(ValidationError::MissingModel),
    };

    let endpoint_type = request
        .endpoint_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_ENDPOINT_TYPE);
    let dialect: EndpointDialect =
        endpoint_type
            .parse()
            .map_err(|_unknown| ValidationError::UnsupportedEndpointType {
                value: endpoint_type.to_owned(),
                supported: SUPPORTED_DIALECTS.join(", "),
            })?;

    let dataset_name = match request.dataset_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => validate_dataset_name(name)?,
        Some(_) | None => return Err(ValidationError::MissingDataset),
    };
    let prompt_source = if dataset_name == SYNTHESIZER_DATASET {
        match request
            .dataset_config
            .prompt_source
            .as_deref()
            .map(str::trim)
        {
            Some(source) if !source.is_empty() => validate_dataset_name(source)?,
            Some(_) | None => return Err(ValidationError::MissingPromptSource),
        }
    } else {
        dataset_name.clone()
    };

    let rule_text = request
        .dataset_config
        .func
        .as_deref()
        .filter(|rule| !rule.trim().is_empty())
        .ok_or(ValidationError::MissingArrivalRule)?;
    let arrival_rule = ArrivalRule::parse(rule_text)
        .map_err(|source| ValidationError::InvalidArrivalRule { source })?;

    let kwargs = &request.kwargs;
    let generation_params = GenerationParams {
        temperature: kwargs
            .temperature
            .map(|value| in_range("temperature", value, 0.0, 2.0))
            .transpose()?,
        top_p: kwargs
            .top_p
            .map(|value| {
                if value.is_finite() && value > 0.0 && value <= 1.0 {
                    Ok(value)
                } else {
                    Err(ValidationError::OutOfRange {
                        field: "top_p",
                        value,
                        min: 0.0,
                        max: 1.0,
                    })
                }
            })
            .transpose()?,
        max_tokens: match kwargs.max_tokens {
            Some(0) => return Err(ValidationError::MaxTokensZero),
            other => other,
        },
    };

    let request_timeout = positive_secs(
        "request_timeout",
        kwargs.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    )?;
    if request_timeout > Duration::from_secs_f64(MAX_REQUEST_TIMEOUT_SECS) {
        return Err(ValidationError::OutOfRange {
            field: "request_timeout",
            value: request_timeout.as_secs_f64(),
            min: 0.0,
            max: MAX_REQUEST_TIMEOUT_SECS,
        });
    }
    let skip_idle_threshold = idle_threshold(kwargs.skip_idle_min.unwrap_or(DEFAULT_SKIP_IDLE_MIN))?;
    let time_step = in_range(
        "time_step",
        kwargs.time_step.unwrap_or(DEFAULT_TIME_STEP_SECS),
        MIN_TIME_STEP_SECS,
        MAX_TIME_STEP_SECS,
    )?;
    let report_time_step = to_duration("time_step", time_step)?;
    let slo_ttft = positive_secs("slo_ttft", kwargs.slo_ttft.unwrap_or(DEFAULT_SLO_TTFT_SECS))?;
    let max_run_time = request
        .max_run_time
        .map(|value| positive_secs("max_run_time", value))
        .transpose()?;

    let max_in_flight = match kwargs.max_in_flight {
        Some(0) => return Err(ValidationError::MaxInFlightZero),
        Some(value) if value > Semaphore::MAX_PERMITS => {
            return Err(ValidationError::MaxInFlightTooLarge {
                value,
                max: Semaphore::MAX_PERMITS,
            });
        }
        other => other,
    };
    let admission = match kwargs.admission.as_deref().map(str::trim) {
        None | Some("queue") => Admission::Queue,
        Some("reject") => Admission::Reject,
        Some(other) => {
            return Err(ValidationError::InvalidAdmission {
                value: other.to_owned(),
            });
        }
    };
    let drain_policy = match kwargs.drain_policy.as_deref().map(str::trim) {
        None | Some("drain") => DrainPolicy::Drain,
        Some("abort") => DrainPolicy::Abort,
        Some(other) => {
            return Err(ValidationError::InvalidDrainPolicy {
                value: other.to_owned(),
            });
        }
    };

    Ok(TestConfig {
        id,
        endpoint_url,
        model_name,
        endpoint_type: dialect.as_str().to_owned(),
        dataset_name,
        prompt_source,
        arrival_rule,
        // The top-level seed wins over the dataset-level one.
        random_seed: request.random_seed.or(request.dataset_config.random_seed),
        generation_params,
        request_timeout,
        skip_idle_threshold,
        report_time_step,
        max_run_time,
        slo_ttft,
        max_in_flight,
        admission,
        drain_policy,
        legacy: request.legacy.unwrap_or(false),
        api_key: non_empty(request.key.as_deref()),
        auth_token: non_empty(kwargs.hf_auth_key.as_deref()),
    })
}

fn validate_url(raw: Option<&str>) -> Result<Url, ValidationError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        Some(_) | None => return Err(ValidationError::MissingUrl),
    };
    let url = Url::parse(raw).map_err(|source| ValidationError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ValidationError::UnsupportedScheme {
            url: raw.to_owned(),
        }),
    }
}

fn validate_dataset_name(name: &str) -> Result<String, ValidationError> {
    let valid = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(name.to_owned())
    } else {
        Err(ValidationError::InvalidDatasetName {
            value: name.to_owned(),
        })
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn positive_secs(field: &'static str, value: f64) -> Result<Duration, ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::NotPositive { field, value });
    }
    to_duration(field, value)
}

/// `skip_idle_min` is in minutes; zero disables fast-forwarding.
fn idle_threshold(minutes: f64) -> Result<Duration, ValidationError> {
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(ValidationError::NotPositive {
            field: "skip_idle_min",
            value: minutes,
        });
    }
    to_duration("skip_idle_min", minutes)?
        .checked_mul(60)
        .ok_or(ValidationError::InvalidDuration {
            field: "skip_idle_min",
            value: minutes,
        })
}

fn to_duration(field: &'static str, value: f64) -> Result<Duration, ValidationError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_overflow| ValidationError::InvalidDuration { field, value })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
