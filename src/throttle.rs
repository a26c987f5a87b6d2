//! Rate limiting for outbound traffic.
//!
//! [`RateLimiter`] takes `&self` so one instance can be shared by tasks
//! through a `static`; its last-run instant sits behind a critical-section
//! mutex. Time comes from `embassy_time::Instant`, which is monotonic.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};

use crate::config::ConfigError;

fn interval_for(rate_hz: f32) -> Result<Duration, ConfigError> {
    if !(rate_hz > 0.0) || !rate_hz.is_finite() {
        return Err(ConfigError::InvalidRate(rate_hz));
    }
    Ok(Duration::from_micros((1_000_000.0 / rate_hz) as u64))
}

// ── Fixed-rate limiter ───────────────────────────────────────────────────────

pub struct RateLimiter {
    rate_hz: f32,
    interval: Duration,
    last_run: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(rate_hz: f32) -> Result<Self, ConfigError> {
        Ok(Self {
            rate_hz,
            interval: interval_for(rate_hz)?,
            last_run: Mutex::new(Cell::new(None)),
        })
    }

    /// True at most once per interval. The first call always runs.
    pub fn should_run(&self) -> bool {
        self.should_run_at(Instant::now())
    }

    pub fn should_run_at(&self, now: Instant) -> bool {
        self.last_run.lock(|last| {
            let due = match last.get() {
                None => true,
                Some(prev) => now.saturating_duration_since(prev) >= self.interval,
            };
            if due {
                last.set(Some(now));
            }
            due
        })
    }

    /// Time left before the next run is allowed, zero when already due.
    pub fn time_until_next_at(&self, now: Instant) -> Duration {
        self.last_run.lock(|last| match last.get() {
            None => Duration::from_ticks(0),
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed >= self.interval {
                    Duration::from_ticks(0)
                } else {
                    self.interval - elapsed
                }
            }
        })
    }

    pub fn reset(&self) {
        self.last_run.lock(|last| last.set(None));
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz
    }
}

// ── Token bucket ─────────────────────────────────────────────────────────────

/// Allows short bursts of up to `burst` events while holding the long-run
/// average at `rate_hz`.
pub struct BurstLimiter {
    rate_hz: f32,
    burst: f32,
    tokens: f32,
    last_refill: Option<Instant>,
}

impl BurstLimiter {
    pub fn new(rate_hz: f32, burst: u32) -> Result<Self, ConfigError> {
        interval_for(rate_hz)?;
        let burst = burst.max(1) as f32;
        Ok(Self {
            rate_hz,
            burst,
            tokens: burst,
            last_refill: None,
        })
    }

    pub fn should_run(&mut self) -> bool {
        self.should_run_at(Instant::now())
    }

    pub fn should_run_at(&mut self, now: Instant) -> bool {
        if let Some(prev) = self.last_refill {
            let elapsed_s = now.saturating_duration_since(prev).as_micros() as f32 / 1e6;
            self.tokens = (self.tokens + elapsed_s * self.rate_hz).min(self.burst);
        }
        self.last_refill = Some(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f32 {
        self.tokens
    }

    pub fn reset(&mut self) {
        self.tokens = self.burst;
        self.last_refill = None;
    }
}
