//! Test lifecycle: registration, the single active run, and reports.
//!
//! All state changes go through one `tokio::sync::Mutex` that also owns the
//! active-run slot, and every change is written to the registry before it
//! becomes visible.
mod executor;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::config::types::RegistrationRequest;
use crate::config::validate_registration;
use crate::dispatch::wall_clock_us;
use crate::domain::{Report, RequestOutcome, TestConfig, TestId, TestState, TestStatus};
use crate::error::{AppError, AppResult, CoordinatorError};
use crate::metrics::{
    ReportParams, RequestsStatusSeries, STATUS_INTERVAL, THROUGHPUT_WINDOW, ThroughputSeries,
    build_report, requests_status, throughput_series,
};
use crate::prompts::PromptCatalog;
use crate::store::{Database, OutcomeRecorder, ReportSink};

use executor::{RunContext, RunSummary};

/// Row of [`Coordinator::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub test_id: TestId,
    #[serde(flatten)]
    pub state: TestState,
}

/// Owns every registered test and runs at most one of them at a time.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    db: Database,
    prompts: Arc<dyn PromptCatalog>,
    reports: Arc<dyn ReportSink>,
    /// Bumped whenever a run settles.
    settled: watch::Sender<u64>,
}

#[derive(Default)]
struct State {
    tests: HashMap<TestId, TestEntry>,
    active: Option<ActiveRun>,
}

struct TestEntry {
    config: TestConfig,
    registration: serde_json::Value,
    state: TestState,
}

/// Outcome log of a COMPLETED (or, with `partial`, FAILED) test.
struct FinishedRun {
    config: TestConfig,
    state: TestState,
    outcomes: Vec<RequestOutcome>,
    partial: bool,
}

struct ActiveRun {
    test_id: TestId,
    stop: watch::Sender<bool>,
}

impl Coordinator {
    /// Restores the registry from `db`. Tests left RUNNING by a previous
    /// process are marked FAILED as interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry cannot be read or updated.
    pub async fn open(
        db: Database,
        prompts: Arc<dyn PromptCatalog>,
        reports: Arc<dyn ReportSink>,
    ) -> AppResult<Self> {
        let interrupted = db.fail_interrupted_tests(wall_clock_us()).await?;
        if interrupted > 0 {
            warn!("Marked {} interrupted test(s) as FAILED.", interrupted);
        }

        let mut tests = HashMap::new();
        for stored in db.load_tests().await? {
            let config = serde_json::from_value::<RegistrationRequest>(stored.registration.clone())
                .map_err(AppError::from)
                .and_then(|request| {
                    validate_registration(&request, stored.id.clone()).map_err(AppError::from)
                });
            match config {
                Ok(config) => {
                    tests.insert(
                        stored.id,
                        TestEntry {
                            config,
                            registration: stored.registration,
                            state: stored.state,
                        },
                    );
                }
                Err(err) => warn!("Skipping stored test {}: {}", stored.id, err),
            }
        }
        info!("Restored {} test(s) from the registry.", tests.len());

        let (settled, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    tests,
                    active: None,
                }),
                db,
                prompts,
                reports,
                settled,
            }),
        })
    }

    /// Validates and stores a new test in state REGISTERED.
    ///
    /// # Errors
    ///
    /// Returns a validation error (nothing is stored) or a storage error.
    pub async fn register(&self, request: &RegistrationRequest) -> AppResult<TestId> {
        let id = TestId::generate();
        let config = validate_registration(request, id.clone())?;
        let registration = serde_json::to_value(request)?;
        let state = TestState::registered(wall_clock_us());

        let mut guard = self.inner.state.lock().await;
        self.inner
            .db
            .insert_test(&id, &registration, &state)
            .await?;
        info!(
            "Registered test {}: model '{}' at {} ({}).",
            id, config.model_name, config.endpoint_url, config.endpoint_type
        );
        guard.tests.insert(
            id.clone(),
            TestEntry {
                config,
                registration,
                state,
            },
        );
        Ok(id)
    }

    /// Moves a REGISTERED test to RUNNING and starts it on a background
    /// task. Returns as soon as the run is scheduled.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidTransition` when the test is not
    /// REGISTERED, `Conflict` when another test is running, or a storage
    /// error.
    pub async fn start(&self, id: &TestId) -> AppResult<TestState> {
        let mut guard = self.inner.state.lock().await;
        let State { tests, active } = &mut *guard;
        let entry = tests.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.state.status != TestStatus::Registered {
            return Err(CoordinatorError::InvalidTransition {
                test_id: id.to_string(),
                status: entry.state.status.as_str(),
                expected: TestStatus::Registered.as_str(),
            }
            .into());
        }
        if let Some(running) = active.as_ref() {
            return Err(CoordinatorError::Conflict {
                test_id: id.to_string(),
                running: running.test_id.to_string(),
            }
            .into());
        }

        let mut next = entry.state.clone();
        next.status = TestStatus::Running;
        next.started_at = Some(wall_clock_us());
        self.inner.db.update_test_state(id, &next).await?;
        entry.state = next.clone();

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(self.clone().run(id.clone(), entry.config.clone(), stop_rx));
        *active = Some(ActiveRun {
            test_id: id.clone(),
            stop: stop_tx,
        });
        info!("Started test {}.", id);
        Ok(next)
    }

    /// Asks the running test to stop. The run settles on its own according
    /// to its drain policy and still ends COMPLETED with a report.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or `InvalidTransition` when the test is not
    /// RUNNING.
    pub async fn stop(&self, id: &TestId) -> AppResult<TestState> {
        let mut guard = self.inner.state.lock().await;
        let State { tests, active } = &mut *guard;
        let entry = tests.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.state.status != TestStatus::Running {
            return Err(CoordinatorError::InvalidTransition {
                test_id: id.to_string(),
                status: entry.state.status.as_str(),
                expected: TestStatus::Running.as_str(),
            }
            .into());
        }
        if let Some(run) = active.as_ref().filter(|run| &run.test_id == id) {
            drop(run.stop.send(true));
        }
        if !entry.state.stop_requested {
            info!("Stop requested for test {}.", id);
        }
        entry.state.stop_requested = true;
        Ok(entry.state.clone())
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown test.
    pub async fn status(&self, id: &TestId) -> AppResult<TestState> {
        let guard = self.inner.state.lock().await;
        guard
            .tests
            .get(id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Registration payload of a test, as stored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown test.
    pub async fn config(&self, id: &TestId) -> AppResult<serde_json::Value> {
        let guard = self.inner.state.lock().await;
        guard
            .tests
            .get(id)
            .map(|entry| entry.registration.clone())
            .ok_or_else(|| not_found(id))
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown test.
    pub async fn error_info(&self, id: &TestId) -> AppResult<Option<String>> {
        let guard = self.inner.state.lock().await;
        guard
            .tests
            .get(id)
            .map(|entry| entry.state.error.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Every known test, oldest registration first.
    pub async fn list(&self) -> Vec<TestSummary> {
        let guard = self.inner.state.lock().await;
        let mut summaries: Vec<TestSummary> = guard
            .tests
            .iter()
            .map(|(id, entry)| TestSummary {
                test_id: id.clone(),
                state: entry.state.clone(),
            })
            .collect();
        summaries.sort_by(|left, right| {
            left.state
                .registered_at
                .cmp(&right.state.registered_at)
                .then_with(|| left.test_id.cmp(&right.test_id))
        });
        summaries
    }

    /// Rebuilds the report of a finished test from its outcome log. A
    /// FAILED test only yields a report when `partial` is set, and that
    /// report is flagged partial.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidTransition` while the test has not
    /// finished, `ReportUnavailable` for a FAILED test without `partial`, or
    /// a storage error.
    pub async fn report(&self, id: &TestId, partial: bool) -> AppResult<Report> {
        let finished = self.finished_outcomes(id, partial).await?;
        Ok(build_report(
            &finished.outcomes,
            &report_params(
                &finished.config,
                finished.state.rejected_requests,
                finished.partial,
            ),
        ))
    }

    /// Requests in flight, succeeded and failed over the run of a finished
    /// test, per second.
    ///
    /// # Errors
    ///
    /// Fails like [`Coordinator::report`].
    pub async fn requests_status(
        &self,
        id: &TestId,
        partial: bool,
    ) -> AppResult<RequestsStatusSeries> {
        let finished = self.finished_outcomes(id, partial).await?;
        Ok(requests_status(
            id.as_str(),
            &finished.outcomes,
            STATUS_INTERVAL,
        ))
    }

    /// Token throughput over the run of a finished test, one point per
    /// report time step.
    ///
    /// # Errors
    ///
    /// Fails like [`Coordinator::report`].
    pub async fn throughput(&self, id: &TestId, partial: bool) -> AppResult<ThroughputSeries> {
        let finished = self.finished_outcomes(id, partial).await?;
        Ok(throughput_series(
            id.as_str(),
            &finished.outcomes,
            finished.config.report_time_step,
            THROUGHPUT_WINDOW,
        ))
    }

    /// Fingerprint of the workload the test's run generated.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or `WorkloadUnavailable` until a run has settled
    /// with a fingerprint.
    pub async fn workload_hash(&self, id: &TestId) -> AppResult<String> {
        let state = self.status(id).await?;
        state.workload_hash.ok_or_else(|| {
            CoordinatorError::WorkloadUnavailable {
                test_id: id.to_string(),
                status: state.status.as_str(),
            }
            .into()
        })
    }

    /// Forgets a test: its registry row, outcome log and report artifact.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidTransition` while the test is RUNNING, or
    /// a storage error.
    pub async fn delete(&self, id: &TestId) -> AppResult<()> {
        let mut guard = self.inner.state.lock().await;
        let entry = guard.tests.get(id).ok_or_else(|| not_found(id))?;
        if entry.state.status == TestStatus::Running {
            return Err(CoordinatorError::InvalidTransition {
                test_id: id.to_string(),
                status: entry.state.status.as_str(),
                expected: "not RUNNING",
            }
            .into());
        }
        self.remove_locked(&mut guard, id).await
    }

    /// Deletes every test that is not running. Returns the deleted ids; a
    /// running test is kept.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; tests deleted before it stay deleted.
    pub async fn delete_all(&self) -> AppResult<Vec<TestId>> {
        let mut guard = self.inner.state.lock().await;
        let mut ids: Vec<TestId> = guard
            .tests
            .iter()
            .filter(|(_, entry)| entry.state.status != TestStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        for id in &ids {
            self.remove_locked(&mut guard, id).await?;
        }
        Ok(ids)
    }

    async fn remove_locked(&self, state: &mut State, id: &TestId) -> AppResult<()> {
        let outcomes = self.inner.db.delete_test(id).await?.unwrap_or(0);
        state.tests.remove(id);
        let report = self.inner.reports.remove_report(id).await?;
        info!(
            "Deleted test {} ({} outcomes{}).",
            id,
            outcomes,
            if report { ", report" } else { "" }
        );
        Ok(())
    }

    async fn finished_outcomes(&self, id: &TestId, partial: bool) -> AppResult<FinishedRun> {
        let (config, state) = {
            let guard = self.inner.state.lock().await;
            let entry = guard.tests.get(id).ok_or_else(|| not_found(id))?;
            (entry.config.clone(), entry.state.clone())
        };
        let partial = match state.status {
            TestStatus::Completed => false,
            TestStatus::Failed if partial => true,
            TestStatus::Failed => {
                return Err(CoordinatorError::ReportUnavailable {
                    test_id: id.to_string(),
                }
                .into());
            }
            TestStatus::Registered | TestStatus::Running => {
                return Err(CoordinatorError::InvalidTransition {
                    test_id: id.to_string(),
                    status: state.status.as_str(),
                    expected: TestStatus::Completed.as_str(),
                }
                .into());
            }
        };
        let outcomes = OutcomeRecorder::new(self.inner.db.clone(), id.clone())
            .read_all()
            .await?;
        Ok(FinishedRun {
            config,
            state,
            outcomes,
            partial,
        })
    }

    /// Waits until the test is COMPLETED or FAILED.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or `WaitTimeout` when `limit` passes first.
    pub async fn wait_for(&self, id: &TestId, limit: Option<Duration>) -> AppResult<TestState> {
        let mut settled = self.inner.settled.subscribe();
        let wait = async {
            loop {
                let state = self.status(id).await?;
                if state.status.is_terminal() {
                    return Ok(state);
                }
                if settled.changed().await.is_err() {
                    return Err(AppError::from(CoordinatorError::WaitTimeout {
                        test_id: id.to_string(),
                    }));
                }
            }
        };
        match limit {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_elapsed| {
                AppError::from(CoordinatorError::WaitTimeout {
                    test_id: id.to_string(),
                })
            })?,
            None => wait.await,
        }
    }

    /// Stops the active run, if any, and waits up to `grace` for it to
    /// settle.
    pub async fn shutdown(&self, grace: Duration) {
        let running = {
            let mut guard = self.inner.state.lock().await;
            let State { tests, active } = &mut *guard;
            active.as_ref().map(|run| {
                drop(run.stop.send(true));
                if let Some(entry) = tests.get_mut(&run.test_id) {
                    entry.state.stop_requested = true;
                }
                run.test_id.clone()
            })
        };
        let Some(id) = running else {
            return;
        };
        info!("Waiting up to {:?} for test {} to settle.", grace, id);
        if let Err(err) = self.wait_for(&id, Some(grace)).await {
            warn!("Shutdown without a settled run: {}", err);
        }
    }

    async fn run(self, id: TestId, config: TestConfig, stop: watch::Receiver<bool>) {
        let recorder = OutcomeRecorder::new(self.inner.db.clone(), id.clone());
        // The executor runs on its own task so a panic still settles the test.
        let summary = match tokio::spawn(execute_run(
            Arc::clone(&self.inner.prompts),
            config.clone(),
            recorder.clone(),
            stop,
        ))
        .await
        {
            Ok(summary) => summary,
            Err(err) => RunSummary {
                fatal: Some(
                    CoordinatorError::RunCrashed {
                        test_id: id.to_string(),
                        message: err.to_string(),
                    }
                    .into(),
                ),
                ..RunSummary::default()
            },
        };

        if summary.stopped {
            info!("Test {} was stopped before its schedule ended.", id);
        }
        let rejected = summary.rejected_requests;
        let fatal = match summary.fatal {
            Some(err) => Some(err),
            None => self.publish_report(&config, &recorder, rejected).await.err(),
        };
        self.settle(&id, rejected, summary.workload_hash, fatal).await;
    }

    async fn publish_report(
        &self,
        config: &TestConfig,
        recorder: &OutcomeRecorder,
        rejected: u64,
    ) -> AppResult<()> {
        let outcomes = recorder.read_all().await?;
        let report = build_report(&outcomes, &report_params(config, rejected, false));
        self.inner
            .reports
            .persist_report(&config.id, &report)
            .await?;
        info!(
            "Test {}: {} requests, fail rate {:.3}, TTFT p95 {:.3}s, throughput {:.1} tok/s.",
            config.id,
            report.total_requests,
            report.fail_rate,
            report.ttft_stats.p95,
            report.throughput.avg
        );
        Ok(())
    }

    async fn settle(
        &self,
        id: &TestId,
        rejected: u64,
        workload_hash: Option<String>,
        fatal: Option<AppError>,
    ) {
        let mut guard = self.inner.state.lock().await;
        if guard
            .active
            .as_ref()
            .is_some_and(|run| &run.test_id == id)
        {
            guard.active = None;
        }
        if let Some(entry) = guard.tests.get_mut(id) {
            let mut next = entry.state.clone();
            next.ended_at = Some(wall_clock_us());
            next.rejected_requests = rejected;
            next.workload_hash = workload_hash;
            match fatal {
                None => {
                    next.status = TestStatus::Completed;
                    info!("Test {} completed.", id);
                }
                Some(err) => {
                    next.status = TestStatus::Failed;
                    next.error = Some(err.to_string());
                    let err = CoordinatorError::RunFatal {
                        test_id: id.to_string(),
                        source: Box::new(err),
                    };
                    error!("{}", err);
                }
            }
            if let Err(err) = self.inner.db.update_test_state(id, &next).await {
                error!("Failed to persist final state of test {}: {}", id, err);
            }
            entry.state = next;
        }
        drop(guard);
        self.inner
            .settled
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

async fn execute_run(
    prompts: Arc<dyn PromptCatalog>,
    config: TestConfig,
    recorder: OutcomeRecorder,
    stop: watch::Receiver<bool>,
) -> RunSummary {
    match prompts
        .open(&config.prompt_source, config.random_seed)
        .await
    {
        Ok(prompts) => {
            executor::execute(
                &config,
                RunContext {
                    prompts,
                    recorder,
                    stop,
                },
            )
            .await
        }
        Err(err) => RunSummary {
            fatal: Some(err.into()),
            ..RunSummary::default()
        },
    }
}

fn not_found(id: &TestId) -> AppError {
    CoordinatorError::NotFound {
        test_id: id.to_string(),
    }
    .into()
}

fn report_params(config: &TestConfig, rejected_requests: u64, partial: bool) -> ReportParams {
    ReportParams {
        test_id: config.id.to_string(),
        time_step: config.report_time_step,
        slo_ttft: config.slo_ttft,
        rejected_requests,
        partial,
    }
}
