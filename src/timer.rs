//! Paced interval ticking (C5), in a blocking flavour (plain OS thread
//! sleeps) and a cooperative flavour (tokio timers, driven from its own
//! background task and fed back into a node's event loop via a channel).
//!
//! Both variants share one algorithm: a fixed phase anchor `next_yield`,
//! rebased to `now + interval` only when the interval itself changes.
//! Ordinary ticks never advance the anchor; they just compute how long until
//! the next `interval`-aligned instant past it, which is what keeps the
//! cadence drift-free across repeated executions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

fn sleep_duration(next_yield_ns: i128, now_ns: i128, interval_ns: i128) -> Duration {
    debug_assert!(interval_ns > 0);
    let diff = next_yield_ns - now_ns;
    let mut sleep_ns = diff.rem_euclid(interval_ns);
    if sleep_ns == 0 {
        sleep_ns = interval_ns;
    }
    Duration::from_nanos(sleep_ns as u64)
}

/// Synchronous interval timer for nodes whose handler work is purely
/// synchronous I/O-free DB writes.
pub struct BlockingIntervalTimer {
    origin: Instant,
    next_yield_ns: i128,
    interval: Duration,
}

impl BlockingIntervalTimer {
    pub fn new(interval: Duration) -> Self {
        let origin = Instant::now();
        Self {
            origin,
            next_yield_ns: interval.as_nanos() as i128,
            interval,
        }
    }

    fn elapsed_ns(&self) -> i128 {
        self.origin.elapsed().as_nanos() as i128
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.next_yield_ns = self.elapsed_ns() + interval.as_nanos() as i128;
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the next yield. Returns `true` normally, `false` if
    /// `halted` was observed set (the synchronous analogue of a
    /// keyboard-interrupt aborting the sleep).
    pub fn tick(&self, halted: &AtomicBool) -> bool {
        if halted.load(Ordering::SeqCst) {
            return false;
        }
        if self.interval.is_zero() {
            return true;
        }
        let sleep_for = sleep_duration(self.next_yield_ns, self.elapsed_ns(), self.interval.as_nanos() as i128);
        std::thread::sleep(sleep_for);
        !halted.load(Ordering::SeqCst)
    }
}

/// A handle the owning node keeps, to retune an [`AsyncIntervalTimer`]
/// running on a different task.
#[derive(Clone)]
pub struct IntervalHandle(watch::Sender<Duration>);

impl IntervalHandle {
    pub fn set_interval(&self, interval: Duration) {
        // only fails if every receiver was dropped, i.e. the ticking task
        // already exited; nothing useful to do about that here.
        let _ = self.0.send(interval);
    }
}

/// Cooperative interval timer, meant to live in its own spawned task and
/// feed tick events back to a node's `Session` via `SendEvent`.
pub struct AsyncIntervalTimer {
    origin: Instant,
    next_yield_ns: i128,
    interval: watch::Receiver<Duration>,
}

impl AsyncIntervalTimer {
    pub fn new(interval: Duration) -> (Self, IntervalHandle) {
        let (sender, receiver) = watch::channel(interval);
        let origin = Instant::now();
        let timer = Self {
            origin,
            next_yield_ns: interval.as_nanos() as i128,
            interval: receiver,
        };
        (timer, IntervalHandle(sender))
    }

    fn elapsed_ns(&self) -> i128 {
        self.origin.elapsed().as_nanos() as i128
    }

    /// Await the next paced yield. If the interval is set to zero, returns
    /// immediately (after one cooperative yield, so callers can't busy-loop
    /// the task scheduler).
    pub async fn next(&mut self) {
        if self.interval.has_changed().unwrap_or(false) {
            let interval = *self.interval.borrow_and_update();
            self.next_yield_ns = self.elapsed_ns() + interval.as_nanos() as i128;
        }
        let interval = *self.interval.borrow();
        if interval.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let sleep_for = sleep_duration(self.next_yield_ns, self.elapsed_ns(), interval.as_nanos() as i128);
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_ticks_by_interval() {
        let (mut timer, _handle) = AsyncIntervalTimer::new(Duration::from_millis(1500));
        let start = Instant::now();
        timer.next().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(1450) && elapsed <= Duration::from_millis(1550),
            "elapsed = {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_rebases_next_yield() {
        let (mut timer, handle) = AsyncIntervalTimer::new(Duration::from_millis(1500));
        timer.next().await;

        handle.set_interval(Duration::from_millis(2000));
        let start = Instant::now();
        timer.next().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(1900) && elapsed <= Duration::from_millis(2100),
            "elapsed = {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_sleeps() {
        let (mut timer, handle) = AsyncIntervalTimer::new(Duration::from_millis(1000));
        handle.set_interval(Duration::ZERO);
        let start = Instant::now();
        timer.next().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn blocking_timer_tick_respects_halt_flag() {
        let timer = BlockingIntervalTimer::new(Duration::from_millis(1));
        let halted = AtomicBool::new(true);
        assert!(!timer.tick(&halted));
    }
}
