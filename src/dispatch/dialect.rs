use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::domain::GenerationParams;
use crate::error::DispatchError;

use super::sse::SseEvent;

/// Wire dialect spoken by the endpoint under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDialect {
    OpenAi,
    Vllm,
    Tgi,
    FriendliAi,
    Triton,
}

/// How one SSE event affects the request trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Carries generated text; counts as one token.
    Content,
    /// Role-only deltas, finish markers, keep-alives.
    Ignore,
    /// End-of-stream sentinel.
    Done,
    /// Error envelope or undecodable payload.
    Failure(String),
}

#[derive(Serialize)]
struct ChatMessage<'msg> {
    role: &'static str,
    content: &'msg str,
}

#[derive(Serialize)]
struct ChatBody<'msg> {
    model: &'msg str,
    stream: bool,
    messages: [ChatMessage<'msg>; 1],
    #[serde(flatten)]
    params: &'msg GenerationParams,
}

#[derive(Serialize)]
struct CompletionBody<'msg> {
    model: &'msg str,
    stream: bool,
    prompt: String,
    #[serde(flatten)]
    params: &'msg GenerationParams,
}

#[derive(Serialize)]
struct TritonBody<'msg> {
    text_input: &'msg str,
    stream: bool,
    #[serde(flatten)]
    params: &'msg GenerationParams,
}

pub const SUPPORTED_DIALECTS: [&str; 5] = ["openai", "vllm", "tgi", "friendliai", "triton"];

impl EndpointDialect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EndpointDialect::OpenAi => "openai",
            EndpointDialect::Vllm => "vllm",
            EndpointDialect::Tgi => "tgi",
            EndpointDialect::FriendliAi => "friendliai",
            EndpointDialect::Triton => "triton",
        }
    }

    /// Full request URL for one generation call.
    ///
    /// # Errors
    ///
    /// Returns an error when the joined URL is not valid.
    pub fn request_url(self, base: &Url, model: &str, legacy: bool) -> Result<Url, DispatchError> {
        let path = match self {
            EndpointDialect::Triton => format!("v2/models/{}/generate_stream", model),
            EndpointDialect::OpenAi
            | EndpointDialect::Vllm
            | EndpointDialect::Tgi
            | EndpointDialect::FriendliAi => {
                if legacy {
                    "completions".to_owned()
                } else {
                    "chat/completions".to_owned()
                }
            }
        };
        let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|source| DispatchError::InvalidEndpoint {
            url: joined,
            source,
        })
    }

    /// JSON request body for one prompt.
    ///
    /// # Errors
    ///
    /// Returns an error when the body cannot be encoded.
    pub fn request_body(
        self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
        legacy: bool,
    ) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            EndpointDialect::Triton => serde_json::to_vec(&TritonBody {
                text_input: prompt,
                stream: true,
                params,
            }),
            EndpointDialect::OpenAi
            | EndpointDialect::Vllm
            | EndpointDialect::Tgi
            | EndpointDialect::FriendliAi => {
                if legacy {
                    serde_json::to_vec(&CompletionBody {
                        model,
                        stream: true,
                        prompt: format!("user: {}", prompt),
                        params,
                    })
                } else {
                    serde_json::to_vec(&ChatBody {
                        model,
                        stream: true,
                        messages: [ChatMessage {
                            role: "user",
                            content: prompt,
                        }],
                        params,
                    })
                }
            }
        }
    }

    /// Classifies one decoded SSE event.
    #[must_use]
    pub fn classify(self, event: &SseEvent, legacy: bool) -> EventKind {
        let data = event.data.trim();
        if data == "[DONE]" {
            return EventKind::Done;
        }
        if data.is_empty() {
            return EventKind::Ignore;
        }
        if event.event.as_deref() == Some("error") {
            return EventKind::Failure(format!("error event: {}", truncate(data)));
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(err) => return EventKind::Failure(format!("undecodable payload: {}", err)),
        };
        if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
            return EventKind::Failure(error_message(error));
        }

        match self {
            EndpointDialect::Triton => text_kind(payload.get("text_output")),
            EndpointDialect::FriendliAi if legacy => {
                let sampled = event.event.as_deref() == Some("token_sampled")
                    || payload.get("event").and_then(Value::as_str) == Some("token_sampled");
                if sampled {
                    text_kind(payload.get("text"))
                } else {
                    openai_kind(&payload, legacy)
                }
            }
            EndpointDialect::OpenAi
            | EndpointDialect::Vllm
            | EndpointDialect::Tgi
            | EndpointDialect::FriendliAi => openai_kind(&payload, legacy),
        }
    }
}

fn openai_kind(payload: &Value, legacy: bool) -> EventKind {
    let Some(choices) = payload.get("choices").and_then(Value::as_array) else {
        return EventKind::Ignore;
    };
    let has_content = choices.iter().any(|choice| {
        let text = if legacy {
            choice.get("text")
        } else {
            choice.get("delta").and_then(|delta| delta.get("content"))
        };
        text.and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty())
    });
    if has_content {
        EventKind::Content
    } else {
        EventKind::Ignore
    }
}

fn text_kind(text: Option<&Value>) -> EventKind {
    match text.and_then(Value::as_str) {
        Some(text) if !text.is_empty() => EventKind::Content,
        Some(_) | None => EventKind::Ignore,
    }
}

fn error_message(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned);
    format!("error envelope: {}", truncate(&message))
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", text.get(..cut).unwrap_or(text)),
        None => text.to_owned(),
    }
}

impl FromStr for EndpointDialect {
    type Err = DispatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EndpointDialect::OpenAi),
            "vllm" => Ok(EndpointDialect::Vllm),
            "tgi" => Ok(EndpointDialect::Tgi),
            "friendliai" => Ok(EndpointDialect::FriendliAi),
            "triton" => Ok(EndpointDialect::Triton),
            _ => Err(DispatchError::UnknownDialect {
                value: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for EndpointDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
