use std::time::Duration;

use crate::error::ScheduleRuleError;

use super::ArrivalRule;

/// Upper bound on consecutive idle ticks. A rule that neither grows nor
/// ends within this many ticks is treated as finished.
pub(super) const MAX_IDLE_TICKS: u64 = 1_000_000;
/// Ticks sampled per call while fast-forwarding, so a long scan yields
/// back to the executor between chunks.
pub(super) const FAST_FORWARD_CHUNK: u64 = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub time_step: Duration,
    /// Zero disables idle fast-forward.
    pub skip_idle_threshold: Duration,
    pub max_run_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStep {
    /// `count` requests become due at `virtual_at`; the executor sends them
    /// at `real_at` after run start.
    Due {
        count: u64,
        virtual_at: Duration,
        real_at: Duration,
    },
    /// Nothing became due; the virtual clock now stands at `virtual_at`.
    Idle {
        virtual_at: Duration,
        real_at: Duration,
    },
    /// The rule ended, went quiet, or `max_run_time` passed.
    Done {
        virtual_at: Duration,
        real_at: Duration,
    },
}

/// Walks an [`ArrivalRule`] tick by tick on a virtual clock.
///
/// Tick `k` lies at `k * time_step`. Each call to [`ArrivalSchedule::next_batch`]
/// samples one tick, so a caller that sleeps until
/// [`ArrivalSchedule::upcoming_real_at`] before every call only sees a rule
/// error once its instant is reached. After `skip_idle_threshold` of idle
/// ticks the schedule scans ahead in chunks to the next tick whose count
/// changes (or the rule ends), and the scanned span is removed from real
/// time.
#[derive(Debug)]
pub struct ArrivalSchedule {
    rule: ArrivalRule,
    step_us: u64,
    idle_threshold_us: u64,
    max_run_time_us: Option<u64>,
    next_tick: u64,
    emitted: u64,
    idle_ticks: u64,
    skipped_us: u64,
    /// First tick of the fast-forward in progress.
    scan_from: Option<u64>,
    end_tick: Option<u64>,
}

impl ArrivalSchedule {
    #[must_use]
    pub fn new(rule: ArrivalRule, settings: ScheduleSettings) -> Self {
        Self {
            rule,
            step_us: duration_us(settings.time_step).max(1),
            idle_threshold_us: duration_us(settings.skip_idle_threshold),
            max_run_time_us: settings.max_run_time.map(duration_us),
            next_tick: 0,
            emitted: 0,
            idle_ticks: 0,
            skipped_us: 0,
            scan_from: None,
            end_tick: None,
        }
    }

    /// Evaluates the rule at one instant.
    ///
    /// # Errors
    ///
    /// Propagates evaluation failures of the rule.
    pub fn sample(&self, elapsed: Duration) -> Result<Option<u64>, ScheduleRuleError> {
        self.rule.cumulative_at(elapsed)
    }

    /// Total requests emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Virtual time removed by idle fast-forwards so far.
    #[must_use]
    pub const fn skipped(&self) -> Duration {
        Duration::from_micros(self.skipped_us)
    }

    /// Real offset from run start at which the next call to
    /// [`ArrivalSchedule::next_batch`] is due.
    #[must_use]
    pub const fn upcoming_real_at(&self) -> Duration {
        let tick = match self.end_tick {
            Some(tick) => tick,
            None => self.next_tick,
        };
        Duration::from_micros(self.real_us(tick))
    }

    /// Advances the virtual clock by one tick, or by one fast-forward chunk
    /// while an idle span is being skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the rule fails to evaluate at the sampled tick
    /// or its cumulative count decreases there.
    pub fn next_batch(&mut self) -> Result<ScheduleStep, ScheduleRuleError> {
        if let Some(tick) = self.end_tick {
            return Ok(self.done_at(tick));
        }
        if let Some(from) = self.scan_from {
            return Ok(self.scan_ahead(from));
        }

        let tick = self.next_tick;
        if self.past_max_run_time(tick) {
            return Ok(self.finish(tick));
        }

        self.next_tick = tick.saturating_add(1);
        let Some(count) = self.sample_tick(tick)? else {
            return Ok(self.finish(tick));
        };

        let delta = self.advance_to(count, tick)?;
        if delta > 0 {
            self.idle_ticks = 0;
            return Ok(self.due_at(delta, tick));
        }

        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_threshold_us > 0
            && self.idle_ticks.saturating_mul(self.step_us) >= self.idle_threshold_us
        {
            self.scan_from = Some(self.next_tick);
        } else if self.idle_ticks >= MAX_IDLE_TICKS {
            tracing::info!(
                "Arrival rule stayed flat for {} ticks; ending the schedule.",
                self.idle_ticks
            );
            return Ok(self.finish(tick));
        }
        Ok(self.idle_at(tick))
    }

    /// Samples up to one chunk of ticks ahead of the clock. Scanned ticks are
    /// skipped as they go, so the real clock does not move while scanning.
    fn scan_ahead(&mut self, from: u64) -> ScheduleStep {
        let mut tick = self.next_tick;
        let chunk_end = tick.saturating_add(FAST_FORWARD_CHUNK);
        while tick < chunk_end {
            let scanned = tick.saturating_sub(from);
            if self.past_max_run_time(tick)
                || self.idle_ticks.saturating_add(scanned) >= MAX_IDLE_TICKS
            {
                self.skip_to(tick);
                self.log_fast_forward(from, tick);
                return self.finish(tick);
            }
            match self.sample_tick(tick) {
                Ok(Some(count)) if count == self.emitted => tick = tick.saturating_add(1),
                // Growth, the end sentinel or a failure: resume normal ticking
                // there so the tick is handled at its (now current) instant.
                Ok(_) | Err(_) => {
                    self.skip_to(tick);
                    self.log_fast_forward(from, tick);
                    self.scan_from = None;
                    self.idle_ticks = 0;
                    return self.idle_at(tick.saturating_sub(1));
                }
            }
        }
        self.skip_to(tick);
        self.idle_at(tick.saturating_sub(1))
    }

    fn skip_to(&mut self, tick: u64) {
        let jumped = tick.saturating_sub(self.next_tick);
        self.skipped_us = self
            .skipped_us
            .saturating_add(jumped.saturating_mul(self.step_us));
        self.next_tick = self.next_tick.max(tick);
    }

    fn log_fast_forward(&self, from: u64, to: u64) {
        tracing::debug!(
            "Idle fast-forward skipped {:.3}s of virtual time (t={:.3}s).",
            Duration::from_micros(to.saturating_sub(from).saturating_mul(self.step_us))
                .as_secs_f64(),
            Duration::from_micros(self.tick_us(to)).as_secs_f64()
        );
    }

    fn finish(&mut self, tick: u64) -> ScheduleStep {
        self.end_tick = Some(tick);
        self.scan_from = None;
        self.done_at(tick)
    }

    fn sample_tick(&self, tick: u64) -> Result<Option<u64>, ScheduleRuleError> {
        self.rule
            .cumulative_at(Duration::from_micros(self.tick_us(tick)))
    }

    fn advance_to(&mut self, count: u64, tick: u64) -> Result<u64, ScheduleRuleError> {
        if count < self.emitted {
            return Err(ScheduleRuleError::Decreasing {
                previous: self.emitted,
                current: count,
                at: Duration::from_micros(self.tick_us(tick))
                    .as_secs_f64()
                    .to_string(),
            });
        }
        let delta = count.saturating_sub(self.emitted);
        self.emitted = count;
        Ok(delta)
    }

    fn past_max_run_time(&self, tick: u64) -> bool {
        let virtual_us = self.tick_us(tick);
        self.max_run_time_us.is_some_and(|max_us| virtual_us > max_us)
    }

    const fn tick_us(&self, tick: u64) -> u64 {
        tick.saturating_mul(self.step_us)
    }

    const fn real_us(&self, tick: u64) -> u64 {
        self.tick_us(tick).saturating_sub(self.skipped_us)
    }

    const fn due_at(&self, count: u64, tick: u64) -> ScheduleStep {
        ScheduleStep::Due {
            count,
            virtual_at: Duration::from_micros(self.tick_us(tick)),
            real_at: Duration::from_micros(self.real_us(tick)),
        }
    }

    const fn idle_at(&self, tick: u64) -> ScheduleStep {
        ScheduleStep::Idle {
            virtual_at: Duration::from_micros(self.tick_us(tick)),
            real_at: Duration::from_micros(self.real_us(tick)),
        }
    }

    const fn done_at(&self, tick: u64) -> ScheduleStep {
        ScheduleStep::Done {
            virtual_at: Duration::from_micros(self.tick_us(tick)),
            real_at: Duration::from_micros(self.real_us(tick)),
        }
    }
}

fn duration_us(value: Duration) -> u64 {
    u64::try_from(value.as_micros()).unwrap_or(u64::MAX)
}
