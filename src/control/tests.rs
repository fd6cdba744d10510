use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::http::{ControlError, split_target};
use super::routes::{Route, route};
use super::{bind_control, serve_control};
use crate::coordinator::Coordinator;
use crate::coordinator::test_support::{FixedPrompts, MemorySink, registration};
use crate::dispatch::test_support::{StubReply, spawn_stub};
use crate::domain::TestId;
use crate::shutdown::shutdown_channel;
use crate::store::Database;

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

fn routed(method: &str, target: &str) -> Result<Route, ControlError> {
    let (path, query) = split_target(target)?;
    route(method, &path, &query)
}

/// Sends raw bytes and returns the status code of the answer.
async fn send_raw(addr: SocketAddr, raw: &[u8]) -> Result<u16, String> {
    let mut socket = TcpStream::connect(addr)
        .await
        .map_err(|err| format!("connect failed: {}", err))?;
    socket
        .write_all(raw)
        .await
        .map_err(|err| format!("write failed: {}", err))?;
    socket
        .shutdown()
        .await
        .map_err(|err| format!("shutdown failed: {}", err))?;
    let mut answer = Vec::new();
    socket
        .read_to_end(&mut answer)
        .await
        .map_err(|err| format!("read failed: {}", err))?;
    let text = String::from_utf8_lossy(&answer);
    text.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| format!("missing status in {}", text))
}

async fn call(
    addr: SocketAddr,
    method: &str,
    target: &str,
    body: &str,
) -> Result<(u16, Value), String> {
    let mut socket = TcpStream::connect(addr)
        .await
        .map_err(|err| format!("connect failed: {}", err))?;
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        method,
        target,
        body.len(),
        body
    );
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|err| format!("write failed: {}", err))?;
    let mut raw = Vec::new();
    socket
        .read_to_end(&mut raw)
        .await
        .map_err(|err| format!("read failed: {}", err))?;
    let text = String::from_utf8(raw).map_err(|err| format!("non-utf8 response: {}", err))?;
    let (head, payload) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| format!("malformed response: {}", text))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| format!("missing status in {}", head))?;
    let value = serde_json::from_str(payload)
        .map_err(|err| format!("invalid JSON body {}: {}", payload, err))?;
    Ok((status, value))
}

fn field<'v>(value: &'v Value, key: &str) -> Result<&'v str, String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing '{}' in {}", key, value))
}

#[test]
fn routes_cover_the_control_surface() -> Result<(), String> {
    let cases = [
        ("GET", "/tests", Route::List),
        ("POST", "/tests/register", Route::Register),
        ("POST", "/tests/register_and_start", Route::RegisterAndStart),
        ("POST", "/tests/abc/start", Route::Start(TestId::from("abc"))),
        ("POST", "/tests/abc/stop", Route::Stop(TestId::from("abc"))),
        ("GET", "/tests/abc/status", Route::Status(TestId::from("abc"))),
        ("GET", "/tests/abc/config", Route::Config(TestId::from("abc"))),
        ("GET", "/tests/abc/error", Route::Error(TestId::from("abc"))),
        (
            "GET",
            "/tests/abc/report",
            Route::Report {
                id: TestId::from("abc"),
                partial: false,
            },
        ),
        (
            "GET",
            "/tests/abc/report?partial=%74rue",
            Route::Report {
                id: TestId::from("abc"),
                partial: true,
            },
        ),
        (
            "GET",
            "/tests/abc/report/requests_status?partial=yes",
            Route::RequestsStatus {
                id: TestId::from("abc"),
                partial: true,
            },
        ),
        (
            "GET",
            "/tests/abc/report/throughput",
            Route::Throughput {
                id: TestId::from("abc"),
                partial: false,
            },
        ),
        (
            "GET",
            "/tests/abc/workload_hash",
            Route::WorkloadHash(TestId::from("abc")),
        ),
        ("POST", "/tests/abc/delete", Route::Delete(TestId::from("abc"))),
        ("POST", "/tests/delete_all", Route::DeleteAll),
    ];
    for (method, target, expected) in cases {
        let got =
            routed(method, target).map_err(|err| format!("{} {}: {:?}", method, target, err))?;
        if got != expected {
            return Err(format!("{} {} routed to {:?}", method, target, got));
        }
    }
    Ok(())
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<(), String> {
    for (method, target) in [("GET", "/tests/abc/start"), ("GET", "/tests/delete_all")] {
        match routed(method, target) {
            Err(err) if err.status == 405 => {}
            other => return Err(format!("Expected 405 for {}, got {:?}", target, other)),
        }
    }
    match routed("GET", "/health") {
        Err(err) if err.status == 404 && err.kind == "not_found" => {}
        other => return Err(format!("Expected 404, got {:?}", other)),
    }
    match routed("GET", "tests/abc/status") {
        Err(err) if err.status == 400 => {}
        other => return Err(format!("Expected 400 for a relative target, got {:?}", other)),
    }
    match routed("GET", "/tests/abc/report?partial=maybe") {
        Err(err) if err.status == 400 => Ok(()),
        other => Err(format!("Expected 400, got {:?}", other)),
    }
}

#[test]
fn control_api_drives_a_test_over_http() -> Result<(), String> {
    let stub = spawn_stub(StubReply::Stream {
        first_delay: Duration::from_millis(10),
        tokens: 2,
        gap: Duration::from_millis(5),
        done: true,
    })?;
    run_async_test(async {
        let db = Database::open_in_memory()
            .await
            .map_err(|err| err.to_string())?;
        let coordinator = Coordinator::open(db, Arc::new(FixedPrompts), Arc::new(MemorySink::default()))
            .await
            .map_err(|err| err.to_string())?;
        let listener = bind_control("127.0.0.1:0".parse::<SocketAddr>().map_err(|_| "bad addr")?)
            .await
            .map_err(|err| err.to_string())?;
        let addr = listener
            .local_addr()
            .map_err(|err| format!("local_addr failed: {}", err))?;
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let server = tokio::spawn(serve_control(listener, coordinator.clone(), shutdown_rx));

        let (status, body) = call(addr, "POST", "/tests/register", "{not json").await?;
        if status != 400 || field(&body, "kind")? != "validation" {
            return Err(format!("Bad JSON answered {} {}", status, body));
        }
        let (status, body) = call(addr, "POST", "/tests/register", r#"{"model":"m"}"#).await?;
        if status != 400 || field(&body, "kind")? != "validation" {
            return Err(format!("Invalid registration answered {} {}", status, body));
        }

        let request = registration(&stub.base_url, "1 if t < 0.2 else None");
        let payload = serde_json::to_string(&request).map_err(|err| err.to_string())?;
        let (status, body) = call(addr, "POST", "/tests/register", &payload).await?;
        if status != 200 || field(&body, "status")? != "REGISTERED" {
            return Err(format!("Register answered {} {}", status, body));
        }
        let id = field(&body, "test_id")?.to_owned();

        let (status, body) = call(addr, "GET", &format!("/tests/{}/status", id), "").await?;
        if status != 200 || field(&body, "status")? != "REGISTERED" {
            return Err(format!("Status answered {} {}", status, body));
        }
        let (status, body) = call(addr, "GET", &format!("/tests/{}/config", id), "").await?;
        if status != 200 || field(&body, "model")? != "stub-model" {
            return Err(format!("Config answered {} {}", status, body));
        }
        let (status, _) = call(addr, "GET", "/tests/unknown/status", "").await?;
        if status != 404 {
            return Err(format!("Unknown test answered {}", status));
        }
        let (status, body) = call(addr, "GET", &format!("/tests/{}/report", id), "").await?;
        if status != 409 || field(&body, "kind")? != "conflict" {
            return Err(format!("Early report answered {} {}", status, body));
        }
        let (status, body) = call(addr, "GET", "/tests", "").await?;
        let listed = body
            .get("tests")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if status != 200 || listed != 1 {
            return Err(format!("List answered {} {}", status, body));
        }

        let (status, body) = call(addr, "POST", "/tests/register_and_start", &payload).await?;
        if status != 200 || field(&body, "status")? != "RUNNING" {
            return Err(format!("Register-and-start answered {} {}", status, body));
        }
        let started = TestId::from(field(&body, "test_id")?);
        coordinator
            .wait_for(&started, Some(Duration::from_secs(10)))
            .await
            .map_err(|err| err.to_string())?;

        let (status, body) = call(addr, "GET", &format!("/tests/{}/report", started), "").await?;
        let total = body.get("total_requests").and_then(Value::as_u64);
        if status != 200 || total != Some(1) {
            return Err(format!("Report answered {} {}", status, body));
        }
        let (status, body) = call(addr, "GET", &format!("/tests/{}/error", started), "").await?;
        if status != 200 || !body.get("error").is_some_and(Value::is_null) {
            return Err(format!("Error info answered {} {}", status, body));
        }

        let (status, body) =
            call(addr, "GET", &format!("/tests/{}/report/requests_status", started), "").await?;
        let last_succeeded = body
            .get("points")
            .and_then(Value::as_array)
            .and_then(|points| points.last())
            .and_then(|point| point.get("succeeded"))
            .and_then(Value::as_u64);
        if status != 200 || last_succeeded != Some(1) {
            return Err(format!("Requests status answered {} {}", status, body));
        }
        let (status, body) =
            call(addr, "GET", &format!("/tests/{}/report/throughput", started), "").await?;
        let points = body
            .get("points")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if status != 200 || points == 0 {
            return Err(format!("Throughput answered {} {}", status, body));
        }

        let (status, body) =
            call(addr, "GET", &format!("/tests/{}/workload_hash", started), "").await?;
        let hash = field(&body, "workload_hash")?;
        if status != 200 || hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(format!("Workload hash answered {} {}", status, body));
        }
        let (status, _) = call(addr, "GET", &format!("/tests/{}/workload_hash", id), "").await?;
        if status != 409 {
            return Err(format!("Hash of a test that never ran answered {}", status));
        }

        let (status, body) = call(addr, "POST", &format!("/tests/{}/delete", started), "").await?;
        if status != 200 {
            return Err(format!("Delete answered {} {}", status, body));
        }
        let (status, _) = call(addr, "GET", &format!("/tests/{}/status", started), "").await?;
        if status != 404 {
            return Err(format!("Deleted test still answers {}", status));
        }
        let (status, body) = call(addr, "POST", "/tests/delete_all", "").await?;
        let deleted = body
            .get("deleted_ids")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if status != 200 || deleted != 1 || !coordinator.list().await.is_empty() {
            return Err(format!("Delete-all answered {} {}", status, body));
        }

        let status = send_raw(
            addr,
            b"POST /tests/register HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await?;
        if status != 415 {
            return Err(format!("Non-JSON body answered {}", status));
        }
        let status = send_raw(addr, b"GET /tests HTTP/2.0\r\n\r\n").await?;
        if status != 400 {
            return Err(format!("Unsupported protocol answered {}", status));
        }
        let status = send_raw(
            addr,
            b"POST /tests/register HTTP/1.1\r\nContent-Length: 40\r\n\r\n{}",
        )
        .await?;
        if status != 400 {
            return Err(format!("Truncated body answered {}", status));
        }

        drop(shutdown_tx.send(()));
        server
            .await
            .map_err(|err| format!("server task failed: {}", err))?;
        Ok(())
    })
}
