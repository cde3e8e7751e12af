//! Time source for every component
//!
//! Nothing in the pipeline calls `Utc::now()` or `tokio::time` directly; everything
//! goes through a [`Clock`]. Production wiring uses [`SystemClock`], tests drive a
//! [`ManualClock`] forward explicitly so escalation and timeout behavior is deterministic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared handle to the process-wide clock
pub type SharedClock = Arc<dyn Clock>;

#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Suspend until `deadline`; returns immediately if it already passed
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + to_chrono(duration);
        self.sleep_until(deadline).await
    }
}

/// Convert a std duration into a chrono offset, saturating at a century
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Wall clock backed by tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// Virtual clock that only moves when told to
///
/// Sleepers wake as soon as [`ManualClock::advance`] or [`ManualClock::set`] moves the
/// current instant past their deadline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<watch::Sender<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self { now: Arc::new(tx) }
    }

    /// Move time forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let delta = to_chrono(duration);
        self.now.send_modify(|now| *now = *now + delta);
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        self.now.send_replace(instant);
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Fixed-period ticker driven by a [`Clock`]
///
/// The first tick fires one period after creation. When the clock jumps past several
/// periods at once only a single tick is delivered and the schedule restarts from the
/// observed instant.
#[derive(Debug)]
pub struct Ticker {
    clock: SharedClock,
    period: chrono::Duration,
    next: DateTime<Utc>,
}

impl Ticker {
    pub fn new(clock: SharedClock, period: Duration) -> Self {
        let period = to_chrono(period);
        let next = clock.now() + period;
        Self {
            clock,
            period,
            next,
        }
    }

    /// Wait for the next tick and return the instant it was observed at
    pub async fn tick(&mut self) -> DateTime<Utc> {
        self.clock.sleep_until(self.next).await;
        let now = self.clock.now();
        self.next = self.next + self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        now
    }
}

/// Create a ticker on the given clock
pub fn ticker(clock: &SharedClock, period: Duration) -> Ticker {
    Ticker::new(clock.clone(), period)
}
