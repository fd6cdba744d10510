use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::debug;
use url::Url;

use crate::domain::{GenerationParams, OutcomeResult, RequestOutcome, TestConfig};
use crate::error::DispatchError;

use super::clock::RunClock;
use super::dialect::{EndpointDialect, EventKind};
use super::sse::SseDecoder;

const DEFAULT_USER_AGENT: &str = concat!("servebench/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 512;
/// Placeholder credential meaning "no key".
const EMPTY_API_KEY: &str = "EMPTY";
/// Deadline used when `started + request_timeout` does not fit an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One request handed from the scheduling loop to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRequest {
    pub request_id: u64,
    pub scheduled_at_us: u64,
    pub prompt: String,
}

/// Sends generation requests for one run and records their timing.
///
/// Cheap to clone; every clone shares the connection pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    url: Url,
    dialect: EndpointDialect,
    model: String,
    params: GenerationParams,
    legacy: bool,
    headers: HeaderMap,
    request_timeout: Duration,
    clock: RunClock,
}

#[derive(Debug)]
enum Ending {
    Finished,
    Timeout,
    Aborted,
    Transport(String),
    Protocol(String),
}

#[derive(Debug)]
struct Trace {
    sent_at_us: u64,
    tokens: Vec<u64>,
    status_code: Option<u16>,
}

impl Dispatcher {
    /// Resolves the dialect and builds the HTTP client for a run.
    ///
    /// # Errors
    ///
    /// Returns an error when the dialect is unknown, the request URL cannot
    /// be built, the credential is not a valid header value, or the client
    /// fails to build.
    pub fn new(config: &TestConfig, clock: RunClock) -> Result<Self, DispatchError> {
        let dialect: EndpointDialect = config.endpoint_type.parse()?;
        let url = dialect.request_url(&config.endpoint_url, &config.model_name, config.legacy)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(key) = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty() && *key != EMPTY_API_KEY)
        {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_invalid| DispatchError::InvalidCredential)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        // No client-wide timeout; each request carries its own deadline.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(DEFAULT_USER_AGENT)
            .tcp_nodelay(true)
            .build()
            .map_err(|source| DispatchError::BuildClientFailed { source })?;

        Ok(Self {
            client,
            url,
            dialect,
            model: config.model_name.clone(),
            params: config.generation_params.clone(),
            legacy: config.legacy,
            headers,
            request_timeout: config.request_timeout,
            clock,
        })
    }

    #[must_use]
    pub const fn dialect(&self) -> EndpointDialect {
        self.dialect
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Sends one request and returns its outcome. Never fails: every
    /// per-request problem is recorded in the outcome.
    ///
    /// When `abort` flips to `true` the request is cancelled and recorded as
    /// a transport error with its partial trace.
    pub async fn dispatch(
        &self,
        request: DueRequest,
        mut abort: watch::Receiver<bool>,
    ) -> RequestOutcome {
        let started = Instant::now();
        let deadline = deadline_after(started, self.request_timeout);
        let mut trace = Trace {
            sent_at_us: self.clock.at_us(started),
            tokens: Vec::new(),
            status_code: None,
        };

        let ending = tokio::select! {
            finished = timeout_at(deadline, self.consume(&request.prompt, &mut trace)) => {
                finished.unwrap_or(Ending::Timeout)
            }
            () = wait_for_abort(&mut abort) => Ending::Aborted,
        };
        let completed_at_us = self.clock.now_us();

        let (result, error) = match ending {
            Ending::Finished => (OutcomeResult::Success, None),
            Ending::Timeout => (
                OutcomeResult::Timeout,
                Some(format!(
                    "timed out after {:.3}s",
                    self.request_timeout.as_secs_f64()
                )),
            ),
            Ending::Aborted => (OutcomeResult::TransportError, Some("aborted".to_owned())),
            Ending::Transport(message) => (OutcomeResult::TransportError, Some(message)),
            Ending::Protocol(message) => (OutcomeResult::ProtocolError, Some(message)),
        };
        if let Some(error) = error.as_deref() {
            debug!("Request {} ended with {}: {}", request.request_id, result.as_str(), error);
        }

        RequestOutcome {
            request_id: request.request_id,
            scheduled_at_us: request.scheduled_at_us,
            sent_at_us: trace.sent_at_us,
            first_token_at_us: trace.tokens.first().copied(),
            token_count: u64::try_from(trace.tokens.len()).unwrap_or(u64::MAX),
            token_arrival_us: trace.tokens,
            completed_at_us: completed_at_us.max(trace.sent_at_us),
            result,
            status_code: trace.status_code,
            error,
        }
    }

    async fn consume(&self, prompt: &str, trace: &mut Trace) -> Ending {
        let body = match self
            .dialect
            .request_body(&self.model, prompt, &self.params, self.legacy)
        {
            Ok(body) => body,
            Err(err) => return Ending::Protocol(format!("failed to encode request: {}", err)),
        };

        trace.sent_at_us = self.clock.now_us();
        let response = match self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return transport_ending(&err),
        };

        let status = response.status();
        trace.status_code = Some(status.as_u16());
        if !status.is_success() {
            let snippet = read_error_body(response).await;
            return Ending::Protocol(format!("HTTP {}: {}", status.as_u16(), snippet));
        }

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => return transport_ending(&err),
            };
            for event in decoder.push(&bytes) {
                match self.dialect.classify(&event, self.legacy) {
                    EventKind::Content => trace.tokens.push(self.clock.now_us()),
                    EventKind::Ignore => {}
                    EventKind::Done => return Ending::Finished,
                    EventKind::Failure(message) => return Ending::Protocol(message),
                }
            }
        }

        if let Some(event) = decoder.finish() {
            match self.dialect.classify(&event, self.legacy) {
                EventKind::Content => trace.tokens.push(self.clock.now_us()),
                EventKind::Failure(message) => return Ending::Protocol(message),
                EventKind::Ignore | EventKind::Done => {}
            }
        }
        Ending::Finished
    }
}

pub(super) fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}

fn transport_ending(err: &reqwest::Error) -> Ending {
    if err.is_timeout() {
        Ending::Timeout
    } else {
        Ending::Transport(err.to_string())
    }
}

async fn read_error_body(response: Response) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(bytes)) = stream.next().await {
        let room = ERROR_BODY_LIMIT.saturating_sub(collected.len());
        collected.extend(bytes.iter().take(room));
        if collected.len() >= ERROR_BODY_LIMIT {
            break;
        }
    }
    String::from_utf8_lossy(&collected).trim().to_owned()
}

async fn wait_for_abort(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            // Sender gone without aborting; never resolve.
            std::future::pending::<()>().await;
        }
    }
}
