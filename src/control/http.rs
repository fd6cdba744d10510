use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Take};
use tokio::net::TcpStream;

use crate::error::{AppError, AppResult, ServerError};

/// Request line plus headers.
const MAX_HEAD_BYTES: u64 = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// One control request. Bodies are JSON or empty.
#[derive(Debug)]
pub(super) struct HttpRequest {
    pub(super) method: String,
    pub(super) path: String,
    /// Decoded query pairs, in order.
    pub(super) query: Vec<(String, String)>,
    pub(super) body: Vec<u8>,
}

/// A failure answered with the JSON envelope `{ "error": ..., "kind": ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ControlError {
    pub(super) status: u16,
    pub(super) kind: &'static str,
    pub(super) message: String,
}

impl ControlError {
    pub(super) fn new(status: u16, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, "validation", message)
    }
}

impl From<AppError> for ControlError {
    fn from(err: AppError) -> Self {
        let kind = err.kind();
        let status = match kind {
            "validation" | "schedule_rule" => 400,
            "not_found" => 404,
            "conflict" => 409,
            "timeout" => 504,
            _ => 500,
        };
        Self::new(status, kind, err.to_string())
    }
}

pub(super) async fn read_http_request(socket: &mut TcpStream) -> Result<HttpRequest, ControlError> {
    let mut reader = BufReader::new(socket);
    let mut head = (&mut reader).take(MAX_HEAD_BYTES);

    let request_line = read_head_line(&mut head).await?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ControlError::bad_request(format!(
            "Malformed request line '{}'",
            request_line
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ControlError::bad_request(format!(
            "Unsupported protocol '{}'",
            version
        )));
    }
    let (path, query) = split_target(target)?;

    let mut content_length: usize = 0;
    let mut json_body = true;
    loop {
        let line = read_head_line(&mut head).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ControlError::bad_request(format!("Malformed header '{}'", line)))?;
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_invalid| {
                ControlError::bad_request(format!("Invalid Content-Length '{}'", value))
            })?;
        } else if name.eq_ignore_ascii_case("content-type") {
            let media_type = value.split(';').next().unwrap_or_default().trim();
            json_body = media_type.eq_ignore_ascii_case("application/json");
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(ControlError::new(413, "validation", "Request body too large"));
    }
    if content_length > 0 && !json_body {
        return Err(ControlError::new(
            415,
            "validation",
            "Request bodies must be application/json",
        ));
    }
    let mut body = vec![0_u8; content_length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| ControlError::bad_request(format!("Truncated request body: {}", err)))?;

    Ok(HttpRequest {
        method: method.to_owned(),
        path,
        query,
        body,
    })
}

/// Splits a request target into its path and decoded query pairs.
pub(super) fn split_target(target: &str) -> Result<(String, Vec<(String, String)>), ControlError> {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if !path.starts_with('/') {
        return Err(ControlError::bad_request(format!(
            "Request target '{}' is not an absolute path",
            target
        )));
    }
    let pairs = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    Ok((path.to_owned(), pairs))
}

/// Reads one CRLF-terminated head line, without the terminator.
async fn read_head_line<R>(head: &mut Take<R>) -> Result<String, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = head
        .read_line(&mut line)
        .await
        .map_err(|err| ControlError::bad_request(format!("Failed to read request: {}", err)))?;
    if !line.ends_with('\n') {
        if head.limit() == 0 {
            return Err(ControlError::new(431, "validation", "Request head too large"));
        }
        return Err(ControlError::bad_request(if read == 0 {
            "Empty request"
        } else {
            "Request ended inside its head"
        }));
    }
    line.truncate(line.trim_end_matches(['\r', '\n']).len());
    Ok(line)
}

const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

pub(super) async fn write_json_response<T>(
    socket: &mut TcpStream,
    status: u16,
    response: &T,
) -> AppResult<()>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(response).map_err(|err| {
        AppError::server(ServerError::Serialize {
            context: "control response",
            source: err,
        })
    })?;
    write_response(socket, status, &body).await
}

pub(super) async fn write_error_response(
    socket: &mut TcpStream,
    error: &ControlError,
) -> AppResult<()> {
    #[derive(Serialize)]
    struct ErrorResponse<'msg> {
        error: &'msg str,
        kind: &'msg str,
    }
    write_json_response(
        socket,
        error.status,
        &ErrorResponse {
            error: &error.message,
            kind: error.kind,
        },
    )
    .await
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &[u8]) -> AppResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    );
    socket.write_all(response.as_bytes()).await.map_err(|err| {
        AppError::server(ServerError::Io {
            context: "write control response",
            source: err,
        })
    })?;
    socket.write_all(body).await.map_err(|err| {
        AppError::server(ServerError::Io {
            context: "write control response body",
            source: err,
        })
    })?;
    Ok(())
}
