use thiserror::Error;

/// Run-fatal failures of the request dispatcher. Per-request failures are
/// never represented here; they are recorded as outcome data.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown endpoint dialect '{value}'.")]
    UnknownDialect { value: String },
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to build HTTP client: {source}")]
    BuildClientFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid auth credential for the endpoint.")]
    InvalidCredential,
    #[error("Prompt source '{name}' is unavailable: {reason}")]
    PromptSourceUnavailable { name: String, reason: String },
    #[error("Prompt source '{name}' was exhausted.")]
    PromptSourceExhausted { name: String },
}
