use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub max_concurrent: usize,
    /// Calls currently holding a slot.
    pub in_flight: usize,
    /// Calls waiting for their turn to start.
    pub queued: usize,
    /// Remaining reservoir level, if a reservoir is configured.
    pub reservoir: Option<u32>,
    /// Time left on a provider-imposed pause (Retry-After), if any.
    pub paused_ms: Option<u64>,
}

/// Periodic start budget: the level is reset to `refill_amount` every
/// `refill_interval_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    pub initial: u32,
    pub refill_amount: u32,
    pub refill_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum simultaneous in-flight calls.
    pub max_concurrent: usize,
    /// Minimum spacing between two call starts.
    pub min_time_ms: u64,
    pub reservoir: Option<ReservoirConfig>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            min_time_ms: 0,
            reservoir: None,
        }
    }
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_min_time(mut self, spacing: Duration) -> Self {
        self.min_time_ms = spacing.as_millis() as u64;
        self
    }

    pub fn with_reservoir(mut self, initial: u32, refill_amount: u32, every: Duration) -> Self {
        self.reservoir = Some(ReservoirConfig {
            initial,
            refill_amount,
            refill_interval_ms: every.as_millis() as u64,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::configuration(
                "rate_limit.max_concurrent must be at least 1",
            ));
        }
        if let Some(r) = &self.reservoir {
            if r.refill_interval_ms == 0 {
                return Err(Error::configuration(
                    "rate_limit.reservoir.refill_interval_ms must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Gate {
    last_start: Option<Instant>,
    reservoir: Option<u32>,
    last_refill: Instant,
}

/// Shared limiter for outbound calls.
///
/// Start order follows submission order: waiters queue on a fair mutex (the
/// gate), and the head of the queue holds it until it has a concurrency slot,
/// its spacing has elapsed and the reservoir allows a start. Slots are held by
/// the returned [`LimiterPermit`] and freed on drop, whatever the outcome.
///
/// Provider back-off ([`RateLimiter::pause_for`]) is a lock-free deadline so
/// a caller still holding a slot can record it while the queue head owns the
/// gate.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    slots: Arc<Semaphore>,
    gate: Mutex<Gate>,
    queued: AtomicUsize,
    /// Reference point for `paused_until_ms`.
    epoch: Instant,
    /// Milliseconds after `epoch` before which no call may start.
    paused_until_ms: AtomicU64,
}

/// Held for the duration of one network attempt.
#[derive(Debug)]
pub struct LimiterPermit {
    _slot: OwnedSemaphorePermit,
}

struct QueueGuard<'a>(&'a AtomicUsize);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let max = cfg.max_concurrent.max(1);
        let reservoir = cfg.reservoir.as_ref().map(|r| r.initial);
        Self {
            slots: Arc::new(Semaphore::new(max)),
            gate: Mutex::new(Gate {
                last_start: None,
                reservoir,
                last_refill: Instant::now(),
            }),
            queued: AtomicUsize::new(0),
            epoch: Instant::now(),
            paused_until_ms: AtomicU64::new(0),
            cfg,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn refill_locked(cfg: &RateLimiterConfig, gate: &mut Gate, now: Instant) {
        let Some(r) = &cfg.reservoir else { return };
        let interval = Duration::from_millis(r.refill_interval_ms.max(1));
        let elapsed = now.duration_since(gate.last_refill);
        if elapsed >= interval {
            let periods = (elapsed.as_millis() / interval.as_millis()) as u32;
            gate.reservoir = Some(r.refill_amount);
            gate.last_refill += interval * periods;
        }
    }

    /// Remaining provider back-off, if any.
    fn paused_remaining(&self, now: Instant) -> Option<Duration> {
        let until = self.epoch + Duration::from_millis(self.paused_until_ms.load(Ordering::SeqCst));
        (until > now).then(|| until - now)
    }

    /// Time the queue head must still wait before starting, or zero.
    fn wait_locked(&self, gate: &mut Gate, now: Instant) -> Duration {
        let cfg = &self.cfg;
        let mut wait = self.paused_remaining(now).unwrap_or(Duration::ZERO);
        if let Some(last) = gate.last_start {
            let next = last + Duration::from_millis(cfg.min_time_ms);
            if next > now {
                wait = wait.max(next - now);
            }
        }
        if let (Some(0), Some(r)) = (gate.reservoir, &cfg.reservoir) {
            let next = gate.last_refill + Duration::from_millis(r.refill_interval_ms.max(1));
            wait = wait.max(next.saturating_duration_since(now));
        }
        wait
    }

    /// Wait for a start slot. The permit must be held until the attempt ends.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let _queued = QueueGuard(&self.queued);

        let mut gate = self.gate.lock().await;
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::runtime("rate limiter closed"))?;

        loop {
            let now = Instant::now();
            Self::refill_locked(&self.cfg, &mut gate, now);
            let wait = self.wait_locked(&mut gate, now);
            if wait.is_zero() {
                if let Some(level) = gate.reservoir.as_mut() {
                    *level -= 1;
                }
                gate.last_start = Some(now);
                break;
            }
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter delaying start");
            tokio::time::sleep(wait).await;
        }

        Ok(LimiterPermit { _slot: slot })
    }

    /// Block new starts for `duration` (e.g. from a 429 `Retry-After`).
    ///
    /// Never waits on the gate, so it is safe to call while holding a permit.
    /// A shorter pause never cuts an existing one short.
    pub fn pause_for(&self, duration: Duration) {
        let until = (Instant::now() + duration).duration_since(self.epoch);
        self.paused_until_ms
            .fetch_max(until.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let max = self.cfg.max_concurrent.max(1);
        let now = Instant::now();
        let reservoir = match self.gate.try_lock() {
            Ok(mut gate) => {
                Self::refill_locked(&self.cfg, &mut gate, now);
                gate.reservoir
            }
            // the queue head is holding the gate; report what we can
            Err(_) => None,
        };
        let paused_ms = self.paused_remaining(now).map(|d| d.as_millis() as u64);
        RateLimiterSnapshot {
            max_concurrent: max,
            in_flight: max - self.slots.available_permits(),
            queued: self.queued.load(Ordering::SeqCst),
            reservoir,
            paused_ms,
        }
    }
}
