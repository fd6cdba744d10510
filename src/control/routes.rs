use serde::Serialize;
use serde_json::Value;

use crate::config::parse_bool_flag;
use crate::config::types::RegistrationRequest;
use crate::coordinator::{Coordinator, TestSummary};
use crate::domain::{TestId, TestStatus};
use crate::error::AppError;

use super::http::ControlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Route {
    Register,
    RegisterAndStart,
    List,
    Start(TestId),
    Stop(TestId),
    Status(TestId),
    Config(TestId),
    Report { id: TestId, partial: bool },
    RequestsStatus { id: TestId, partial: bool },
    Throughput { id: TestId, partial: bool },
    WorkloadHash(TestId),
    Error(TestId),
    Delete(TestId),
    DeleteAll,
}

/// Maps a method, path and query onto a control operation.
pub(super) fn route(
    method: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<Route, ControlError> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let route = match (method, segments.as_slice()) {
        ("GET", ["tests"]) => Route::List,
        ("POST", ["tests", "register"]) => Route::Register,
        ("POST", ["tests", "register_and_start"]) => Route::RegisterAndStart,
        ("POST", ["tests", "delete_all"]) => Route::DeleteAll,
        ("POST", ["tests", id, "delete"]) => Route::Delete(TestId::from(*id)),
        ("POST", ["tests", id, "start"]) => Route::Start(TestId::from(*id)),
        ("POST", ["tests", id, "stop"]) => Route::Stop(TestId::from(*id)),
        ("GET", ["tests", id, "status"]) => Route::Status(TestId::from(*id)),
        ("GET", ["tests", id, "config"]) => Route::Config(TestId::from(*id)),
        ("GET", ["tests", id, "error"]) => Route::Error(TestId::from(*id)),
        ("GET", ["tests", id, "workload_hash"]) => Route::WorkloadHash(TestId::from(*id)),
        ("GET", ["tests", id, "report"]) => Route::Report {
            id: TestId::from(*id),
            partial: partial_flag(query)?,
        },
        ("GET", ["tests", id, "report", "requests_status"]) => Route::RequestsStatus {
            id: TestId::from(*id),
            partial: partial_flag(query)?,
        },
        ("GET", ["tests", id, "report", "throughput"]) => Route::Throughput {
            id: TestId::from(*id),
            partial: partial_flag(query)?,
        },
        (_, ["tests"])
        | (_, ["tests", "register" | "register_and_start" | "delete_all"])
        | (
            _,
            [
                "tests",
                _,
                "start" | "stop" | "status" | "config" | "error" | "report" | "delete"
                | "workload_hash",
            ],
        )
        | (_, ["tests", _, "report", "requests_status" | "throughput"]) => {
            return Err(ControlError::new(
                405,
                "validation",
                format!("Method {} not allowed on {}", method, path),
            ));
        }
        _ => {
            return Err(ControlError::new(
                404,
                "not_found",
                format!("No route for {} {}", method, path),
            ));
        }
    };
    Ok(route)
}

fn partial_flag(query: &[(String, String)]) -> Result<bool, ControlError> {
    match query.iter().find(|(key, _)| key == "partial") {
        Some((_, value)) => {
            parse_bool_flag(value).map_err(|err| ControlError::from(AppError::from(err)))
        }
        None => Ok(false),
    }
}

#[derive(Debug, Serialize)]
struct Registered {
    test_id: TestId,
    status: TestStatus,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    test_id: TestId,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TestList {
    tests: Vec<TestSummary>,
}

#[derive(Debug, Serialize)]
struct WorkloadHash {
    test_id: TestId,
    workload_hash: String,
}

#[derive(Debug, Serialize)]
struct Deleted {
    deleted_ids: Vec<TestId>,
}

/// Runs one routed request against the coordinator and returns the JSON
/// body of a 200 response.
pub(super) async fn handle(
    coordinator: &Coordinator,
    route: Route,
    body: &[u8],
) -> Result<Value, ControlError> {
    let value = match route {
        Route::Register => {
            let request = registration(body)?;
            let test_id = coordinator.register(&request).await?;
            to_json(&Registered {
                test_id,
                status: TestStatus::Registered,
            })?
        }
        Route::RegisterAndStart => {
            let request = registration(body)?;
            let test_id = coordinator.register(&request).await?;
            let state = coordinator.start(&test_id).await?;
            to_json(&TestSummary { test_id, state })?
        }
        Route::List => to_json(&TestList {
            tests: coordinator.list().await,
        })?,
        Route::Start(test_id) => {
            let state = coordinator.start(&test_id).await?;
            to_json(&TestSummary { test_id, state })?
        }
        Route::Stop(test_id) => {
            let state = coordinator.stop(&test_id).await?;
            to_json(&TestSummary { test_id, state })?
        }
        Route::Status(test_id) => {
            let state = coordinator.status(&test_id).await?;
            to_json(&TestSummary { test_id, state })?
        }
        Route::Config(test_id) => coordinator.config(&test_id).await?,
        Route::Report { id, partial } => to_json(&coordinator.report(&id, partial).await?)?,
        Route::RequestsStatus { id, partial } => {
            to_json(&coordinator.requests_status(&id, partial).await?)?
        }
        Route::Throughput { id, partial } => {
            to_json(&coordinator.throughput(&id, partial).await?)?
        }
        Route::WorkloadHash(test_id) => {
            let workload_hash = coordinator.workload_hash(&test_id).await?;
            to_json(&WorkloadHash {
                test_id,
                workload_hash,
            })?
        }
        Route::Error(test_id) => {
            let error = coordinator.error_info(&test_id).await?;
            to_json(&ErrorInfo { test_id, error })?
        }
        Route::Delete(test_id) => {
            coordinator.delete(&test_id).await?;
            to_json(&Deleted {
                deleted_ids: vec![test_id],
            })?
        }
        Route::DeleteAll => to_json(&Deleted {
            deleted_ids: coordinator.delete_all().await?,
        })?,
    };
    Ok(value)
}

fn registration(body: &[u8]) -> Result<RegistrationRequest, ControlError> {
    serde_json::from_slice(body)
        .map_err(|err| ControlError::bad_request(format!("Invalid JSON: {}", err)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ControlError> {
    serde_json::to_value(value).map_err(|err| ControlError::from(AppError::from(err)))
}
