use tokio::time::Instant;

/// Monotonic clock anchored to the wall clock once per run.
///
/// Every instant recorded during a run is `epoch_us + (now - origin)`, so
/// timestamps are comparable with wall-clock time while never going
/// backwards inside the run.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch_us: u64,
    origin: Instant,
}

impl RunClock {
    #[must_use]
    pub fn start() -> Self {
        let epoch_us = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        Self {
            epoch_us,
            origin: Instant::now(),
        }
    }

    /// Microseconds since the UNIX epoch.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.at_us(Instant::now())
    }

    #[must_use]
    pub fn at_us(&self, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(self.origin);
        self.epoch_us
            .saturating_add(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
    }

    /// Instant `offset` after the run started.
    #[must_use]
    pub fn after(&self, offset: std::time::Duration) -> Instant {
        self.origin.checked_add(offset).unwrap_or(self.origin)
    }
}

/// Wall-clock microseconds since the UNIX epoch, for timestamps outside a run.
#[must_use]
pub fn wall_clock_us() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}
