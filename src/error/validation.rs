use thiserror::Error;

use super::ScheduleRuleError;

/// Reasons a registration payload is rejected before any state is created.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("URL must be provided.")]
    MissingUrl,
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Endpoint URL '{url}' must use http or https.")]
    UnsupportedScheme { url: String },
    #[error("Model must be specified.")]
    MissingModel,
    #[error("Unsupported endpoint type '{value}'. Use one of: {supported}.")]
    UnsupportedEndpointType { value: String, supported: String },
    #[error("Dataset name must be specified.")]
    MissingDataset,
    #[error("Invalid dataset name '{value}'. Use letters, digits, '-' or '_'.")]
    InvalidDatasetName { value: String },
    #[error("Dataset 'synthesizer' requires dataset_config.prompt_source.")]
    MissingPromptSource,
    #[error("dataset_config.func (arrival rule) must be provided.")]
    MissingArrivalRule,
    #[error("Invalid arrival rule: {source}")]
    InvalidArrivalRule {
        #[source]
        source: ScheduleRuleError,
    },
    #[error("'{field}' must be a finite number > 0 (got {value}).")]
    NotPositive { field: &'static str, value: f64 },
    #[error("'{field}' must be within [{min}, {max}] (got {value}).")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("'{field}' is out of range for a duration: {value}.")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("max_tokens must be >= 1.")]
    MaxTokensZero,
    #[error("max_in_flight must be >= 1.")]
    MaxInFlightZero,
    #[error("max_in_flight must be <= {max} (got {value}).")]
    MaxInFlightTooLarge { value: usize, max: usize },
    #[error("Unknown admission policy '{value}'. Use queue or reject.")]
    InvalidAdmission { value: String },
    #[error("Unknown drain policy '{value}'. Use drain or abort.")]
    InvalidDrainPolicy { value: String },
    #[error("Invalid boolean '{value}'. Expected true/false, yes/no, on/off, or 1/0.")]
    InvalidBoolean { value: String },
    #[error("Failed to build runtime: {source}")]
    RuntimeBuildFailed {
        #[source]
        source: std::io::Error,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
