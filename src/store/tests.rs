use std::future::Future;
use std::time::Duration;

use tempfile::tempdir;

use super::{Database, JsonReportSink, OutcomeRecorder, ReportSink, read_report_file};
use crate::domain::{OutcomeResult, RequestOutcome, TestId, TestState, TestStatus};
use crate::error::StoreError;
use crate::metrics::{ReportParams, build_report};

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

fn sample_outcome(request_id: u64) -> RequestOutcome {
    RequestOutcome {
        request_id,
        scheduled_at_us: request_id.saturating_mul(100_000),
        sent_at_us: 1_700_000_000_000_000,
        first_token_at_us: Some(1_700_000_000_200_000),
        token_arrival_us: vec![1_700_000_000_200_000, 1_700_000_000_250_000],
        completed_at_us: 1_700_000_000_260_000,
        result: OutcomeResult::Success,
        token_count: 2,
        status_code: Some(200),
        error: None,
    }
}

#[test]
fn outcomes_round_trip_and_reject_duplicates() -> Result<(), String> {
    run_async_test(async {
        let db = Database::open_in_memory()
            .await
            .map_err(|err| err.to_string())?;
        let recorder = OutcomeRecorder::new(db, TestId::from("test-a"));

        let mut timed_out = sample_outcome(2);
        timed_out.result = OutcomeResult::Timeout;
        timed_out.status_code = None;
        timed_out.error = Some("timed out after 1.000s".to_owned());

        recorder
            .append(&sample_outcome(1))
            .await
            .map_err(|err| err.to_string())?;
        recorder
            .append(&timed_out)
            .await
            .map_err(|err| err.to_string())?;

        match recorder.append(&sample_outcome(1)).await {
            Err(StoreError::DuplicateOutcome { request_id: 1, .. }) => {}
            other => return Err(format!("Expected duplicate rejection, got {:?}", other)),
        }

        let stored = recorder.read_all().await.map_err(|err| err.to_string())?;
        if stored != vec![sample_outcome(1), timed_out] {
            return Err(format!("Unexpected stored outcomes: {:?}", stored));
        }
        Ok(())
    })
}

#[test]
fn concurrent_appends_are_all_recorded() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        let db = Database::open_in_memory()
            .await
            .map_err(|err| err.to_string())?;
        let recorder = OutcomeRecorder::new(db, TestId::from("test-b"));

        let mut tasks = tokio::task::JoinSet::new();
        for request_id in 0..200_u64 {
            let recorder = recorder.clone();
            tasks.spawn(async move { recorder.append(&sample_outcome(request_id)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined
                .map_err(|err| err.to_string())?
                .map_err(|err| err.to_string())?;
        }

        let stored = recorder.read_all().await.map_err(|err| err.to_string())?;
        if stored.len() != 200 {
            return Err(format!("Expected 200 outcomes, got {}", stored.len()));
        }
        Ok(())
    })
}

#[test]
fn registry_survives_reopen_and_fails_interrupted_runs() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("state").join("servebench.db");

    run_async_test(async {
        let registration = serde_json::json!({ "url": "http://localhost:8000/v1", "model": "m" });
        {
            let db = Database::open(&path).await.map_err(|err| err.to_string())?;
            let done = TestId::from("done");
            let mut state = TestState::registered(10);
            db.insert_test(&done, &registration, &state)
                .await
                .map_err(|err| err.to_string())?;
            state.status = TestStatus::Completed;
            state.started_at = Some(11);
            state.ended_at = Some(12);
            db.update_test_state(&done, &state)
                .await
                .map_err(|err| err.to_string())?;

            let running = TestId::from("running");
            let mut state = TestState::registered(20);
            db.insert_test(&running, &registration, &state)
                .await
                .map_err(|err| err.to_string())?;
            state.status = TestStatus::Running;
            state.started_at = Some(21);
            db.update_test_state(&running, &state)
                .await
                .map_err(|err| err.to_string())?;
        }

        let db = Database::open(&path).await.map_err(|err| err.to_string())?;
        let failed = db
            .fail_interrupted_tests(99)
            .await
            .map_err(|err| err.to_string())?;
        if failed != 1 {
            return Err(format!("Expected one interrupted test, got {}", failed));
        }

        let tests = db.load_tests().await.map_err(|err| err.to_string())?;
        let ids: Vec<&str> = tests.iter().map(|test| test.id.as_str()).collect();
        if ids != ["done", "running"] {
            return Err(format!("Unexpected order: {:?}", ids));
        }
        let interrupted = tests
            .iter()
            .find(|test| test.id.as_str() == "running")
            .ok_or("missing running test")?;
        if interrupted.state.status != TestStatus::Failed
            || interrupted.state.error.as_deref() != Some("interrupted")
            || interrupted.state.ended_at != Some(99)
        {
            return Err(format!("Unexpected state: {:?}", interrupted.state));
        }
        if interrupted.registration != registration {
            return Err("Registration payload changed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn delete_removes_test_and_outcomes() -> Result<(), String> {
    run_async_test(async {
        let db = Database::open_in_memory()
            .await
            .map_err(|err| err.to_string())?;
        let registration = serde_json::json!({ "model": "m" });
        let mut state = TestState::registered(5);
        state.workload_hash = Some("abc123".to_owned());
        for id in ["gone", "kept"] {
            db.insert_test(&TestId::from(id), &registration, &state)
                .await
                .map_err(|err| err.to_string())?;
        }
        let gone = OutcomeRecorder::new(db.clone(), TestId::from("gone"));
        let kept = OutcomeRecorder::new(db.clone(), TestId::from("kept"));
        for request_id in 0..3_u64 {
            gone.append(&sample_outcome(request_id))
                .await
                .map_err(|err| err.to_string())?;
        }
        kept.append(&sample_outcome(0))
            .await
            .map_err(|err| err.to_string())?;

        let removed = db
            .delete_test(&TestId::from("gone"))
            .await
            .map_err(|err| err.to_string())?;
        if removed != Some(3) {
            return Err(format!("Expected 3 removed outcomes, got {:?}", removed));
        }
        let again = db
            .delete_test(&TestId::from("gone"))
            .await
            .map_err(|err| err.to_string())?;
        if again.is_some() {
            return Err("Second delete should find nothing".to_owned());
        }

        let tests = db.load_tests().await.map_err(|err| err.to_string())?;
        match tests.as_slice() {
            [only] if only.id.as_str() == "kept"
                && only.state.workload_hash.as_deref() == Some("abc123") => {}
            other => return Err(format!("Unexpected registry after delete: {:?}", other)),
        }
        if !gone.read_all().await.map_err(|err| err.to_string())?.is_empty() {
            return Err("Outcomes of the deleted test survived".to_owned());
        }
        if kept.read_all().await.map_err(|err| err.to_string())?.len() != 1 {
            return Err("Outcomes of another test were removed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn json_sink_writes_report_artifact() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let sink = JsonReportSink::new(dir.path().join("reports"));
    let test_id = TestId::from("abc");
    let report = build_report(
        &[sample_outcome(1)],
        &ReportParams {
            test_id: test_id.to_string(),
            time_step: Duration::from_millis(100),
            slo_ttft: Duration::from_secs(1),
            rejected_requests: 0,
            partial: false,
        },
    );

    run_async_test(async {
        sink.persist_report(&test_id, &report)
            .await
            .map_err(|err| err.to_string())?;
        let path = sink.report_path(&test_id);
        if path.file_name().and_then(|name| name.to_str()) != Some("report_abc.json") {
            return Err(format!("Unexpected report path: {}", path.display()));
        }
        let raw = std::fs::read_to_string(&path).map_err(|err| err.to_string())?;
        if !raw.contains("\"95_percentile\"") || !raw.contains("\"fail_rate\"") {
            return Err(format!("Unexpected report JSON: {}", raw));
        }
        let loaded = read_report_file(&path)
            .await
            .map_err(|err| err.to_string())?;
        if loaded != report {
            return Err("Report changed on disk".to_owned());
        }

        let removed = sink
            .remove_report(&test_id)
            .await
            .map_err(|err| err.to_string())?;
        if !removed || path.exists() {
            return Err("Report was not removed".to_owned());
        }
        let again = sink
            .remove_report(&test_id)
            .await
            .map_err(|err| err.to_string())?;
        if again {
            return Err("Missing report reported as removed".to_owned());
        }
        Ok(())
    })
}
