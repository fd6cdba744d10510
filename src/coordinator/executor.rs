use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, DueRequest, RunClock};
use crate::domain::{Admission, DrainPolicy, TestConfig};
use crate::error::{AppError, StoreError};
use crate::prompts::PromptSource;
use crate::schedule::{ArrivalSchedule, ScheduleSettings, ScheduleStep};
use crate::store::OutcomeRecorder;

/// Everything one run needs besides its config.
pub(super) struct RunContext {
    pub(super) prompts: Arc<dyn PromptSource>,
    pub(super) recorder: OutcomeRecorder,
    pub(super) stop: watch::Receiver<bool>,
}

/// How a run ended. `fatal` is set when the run must end FAILED; the
/// outcomes recorded before it are kept either way.
#[derive(Debug, Default)]
pub(super) struct RunSummary {
    pub(super) dispatched: u64,
    pub(super) rejected_requests: u64,
    pub(super) stopped: bool,
    pub(super) fatal: Option<AppError>,
    /// Hex SHA-256 over every scheduled request, see [`WorkloadFingerprint`].
    pub(super) workload_hash: Option<String>,
}

enum LoopEnd {
    Exhausted,
    Stopped,
    Fatal(AppError),
}

/// Drives one test: walks the arrival schedule, sends each due request on
/// its own task and waits for every dispatch to be recorded.
pub(super) async fn execute(config: &TestConfig, mut ctx: RunContext) -> RunSummary {
    let clock = RunClock::start();
    let dispatcher = match Dispatcher::new(config, clock) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            return RunSummary {
                fatal: Some(err.into()),
                ..RunSummary::default()
            };
        }
    };
    info!(
        "Running test {} against {} ({}).",
        config.id,
        dispatcher.url(),
        dispatcher.dialect()
    );

    let mut schedule = ArrivalSchedule::new(
        config.arrival_rule.clone(),
        ScheduleSettings {
            time_step: config.report_time_step,
            skip_idle_threshold: config.skip_idle_threshold,
            max_run_time: config.max_run_time,
        },
    );
    let limiter = config
        .max_in_flight
        .map(|limit| Arc::new(Semaphore::new(limit)));
    let (abort_tx, abort_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<(), StoreError>> = JoinSet::new();
    let mut summary = RunSummary::default();
    let mut fingerprint = WorkloadFingerprint::default();
    let mut next_request_id: u64 = 0;

    let end = 'schedule: loop {
        if *ctx.stop.borrow() {
            break LoopEnd::Stopped;
        }
        // Each tick is sampled at its own instant, so a rule error surfaces
        // only once the run reaches it.
        tokio::select! {
            () = sleep_until(clock.after(schedule.upcoming_real_at())) => {}
            () = wait_for_stop(&mut ctx.stop) => break 'schedule LoopEnd::Stopped,
        }
        let (count, virtual_at) = match schedule.next_batch() {
            Ok(ScheduleStep::Due {
                count, virtual_at, ..
            }) => (count, virtual_at),
            Ok(ScheduleStep::Idle { .. }) => {
                tokio::task::yield_now().await;
                continue;
            }
            Ok(ScheduleStep::Done { virtual_at, .. }) => {
                debug!("Schedule ends at t={:.3}s.", virtual_at.as_secs_f64());
                break LoopEnd::Exhausted;
            }
            Err(err) => break LoopEnd::Fatal(err.into()),
        };

        let scheduled_at_us = u64::try_from(virtual_at.as_micros()).unwrap_or(u64::MAX);
        for _ in 0..count {
            let request_id = next_request_id;
            next_request_id = next_request_id.saturating_add(1);

            let permit = match admit(limiter.as_ref(), config.admission, &mut ctx.stop).await {
                Admit::Go(permit) => permit,
                Admit::Rejected => {
                    fingerprint.rejected(request_id, scheduled_at_us);
                    summary.rejected_requests = summary.rejected_requests.saturating_add(1);
                    continue;
                }
                Admit::Stopped => break 'schedule LoopEnd::Stopped,
            };
            let prompt = match ctx.prompts.next_prompt() {
                Ok(prompt) => prompt,
                Err(err) => break 'schedule LoopEnd::Fatal(err.into()),
            };
            fingerprint.dispatched(request_id, scheduled_at_us, &prompt);

            let dispatcher = dispatcher.clone();
            let recorder = ctx.recorder.clone();
            let abort = abort_rx.clone();
            tasks.spawn(async move {
                let outcome = dispatcher
                    .dispatch(
                        DueRequest {
                            request_id,
                            scheduled_at_us,
                            prompt,
                        },
                        abort,
                    )
                    .await;
                drop(permit);
                recorder.append(&outcome).await
            });
            summary.dispatched = summary.dispatched.saturating_add(1);
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(err) = settle(joined) {
                break 'schedule LoopEnd::Fatal(err);
            }
        }
    };

    match end {
        LoopEnd::Exhausted => {}
        LoopEnd::Stopped => {
            summary.stopped = true;
            info!(
                "Test {} stopped; {} in-flight requests ({}).",
                config.id,
                tasks.len(),
                config.drain_policy.as_str()
            );
            if config.drain_policy == DrainPolicy::Abort {
                drop(abort_tx.send(true));
            }
        }
        LoopEnd::Fatal(err) => {
            warn!(
                "Test {} hit a run-fatal error; draining {} in-flight requests: {}",
                config.id,
                tasks.len(),
                err
            );
            summary.fatal = Some(err);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = settle(joined)
            && summary.fatal.is_none()
        {
            summary.fatal = Some(err);
        }
    }
    let workload_hash = fingerprint.finish();
    info!(
        "Test {} settled: {} dispatched, {} rejected, {:.3}s of idle time skipped, workload {}.",
        config.id,
        summary.dispatched,
        summary.rejected_requests,
        schedule.skipped().as_secs_f64(),
        workload_hash
    );
    summary.workload_hash = Some(workload_hash);
    summary
}

/// Running SHA-256 over the generated workload: each scheduled request's id
/// and virtual send time, plus its prompt when it was dispatched. Two runs
/// of the same rule, seed and prompt source hash alike.
#[derive(Default)]
struct WorkloadFingerprint {
    hasher: Sha256,
}

impl WorkloadFingerprint {
    fn rejected(&mut self, request_id: u64, scheduled_at_us: u64) {
        self.request(request_id, scheduled_at_us);
        self.hasher.update([0_u8]);
    }

    fn dispatched(&mut self, request_id: u64, scheduled_at_us: u64, prompt: &str) {
        self.request(request_id, scheduled_at_us);
        self.hasher.update([1_u8]);
        self.hasher.update((prompt.len() as u64).to_le_bytes());
        self.hasher.update(prompt.as_bytes());
    }

    fn request(&mut self, request_id: u64, scheduled_at_us: u64) {
        self.hasher.update(request_id.to_le_bytes());
        self.hasher.update(scheduled_at_us.to_le_bytes());
    }

    fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

enum Admit {
    Go(Option<OwnedSemaphorePermit>),
    Rejected,
    Stopped,
}

async fn admit(
    limiter: Option<&Arc<Semaphore>>,
    admission: Admission,
    stop: &mut watch::Receiver<bool>,
) -> Admit {
    let Some(limiter) = limiter else {
        return Admit::Go(None);
    };
    match admission {
        Admission::Reject => match Arc::clone(limiter).try_acquire_owned() {
            Ok(permit) => Admit::Go(Some(permit)),
            Err(_) => Admit::Rejected,
        },
        Admission::Queue => {
            tokio::select! {
                permit = Arc::clone(limiter).acquire_owned() => match permit {
                    Ok(permit) => Admit::Go(Some(permit)),
                    Err(_) => Admit::Stopped,
                },
                () = wait_for_stop(stop) => Admit::Stopped,
            }
        }
    }
}

fn settle(joined: Result<Result<(), StoreError>, tokio::task::JoinError>) -> Result<(), AppError> {
    joined??;
    Ok(())
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
