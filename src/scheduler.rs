//! Wall-clock to "advance now" translation and the engine's single timer.

use std::future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use tokio::time::{Instant, Sleep, sleep};

/// Source of wall-clock time for catch-up arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The real wall clock. Keeps counting while the host is suspended.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Wall time derived from the tokio clock, so paused-time tests see timers
/// and timestamps move together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: SystemTime,
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    pub fn starting_at(origin_wall: SystemTime) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        self.origin_wall + self.origin.elapsed()
    }
}

/// How far behind the schedule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    /// Time until the next natural tick is due.
    pub delay: Duration,
    /// Whole intervals elapsed since the last advance.
    pub steps_to_skip: u64,
}

/// With `now - last_advance = k * interval + r` returns `k` steps and a delay
/// of `interval - r`. An interval of zero counts as one second; a
/// `last_advance` in the future counts as no time elapsed.
#[must_use]
pub fn compute_catch_up_delay(
    last_advance: SystemTime,
    interval_seconds: u32,
    now: SystemTime,
) -> CatchUp {
    let interval = Duration::from_secs(u64::from(interval_seconds.max(1)));
    let elapsed = now.duration_since(last_advance).unwrap_or_default();
    let interval_ns = interval.as_nanos();
    let elapsed_ns = elapsed.as_nanos();
    let steps = u64::try_from(elapsed_ns / interval_ns).unwrap_or(u64::MAX);
    // remainder < interval, which fits in u64 nanoseconds for any u32 seconds
    let remainder = Duration::from_nanos((elapsed_ns % interval_ns) as u64);
    CatchUp {
        delay: interval - remainder,
        steps_to_skip: steps,
    }
}

/// Identifies one arming of the [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// One-shot timer with single-timer discipline: arming again replaces
/// whatever was pending.
#[derive(Debug, Default)]
pub struct Scheduler {
    sleep: Option<Pin<Box<Sleep>>>,
    deadline: Option<Instant>,
    armed: Option<TimerHandle>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_after(&mut self, delay: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let deadline = Instant::now() + delay;
        self.sleep = Some(Box::pin(sleep(delay)));
        self.deadline = Some(deadline);
        self.armed = Some(handle);
        handle
    }

    /// Returns whether `handle` was still pending. Cancelling twice, after it
    /// fired, or after it was replaced is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if self.armed == Some(handle) {
            self.clear();
            true
        } else {
            false
        }
    }

    pub fn cancel_pending(&mut self) -> Option<TimerHandle> {
        let pending = self.armed;
        self.clear();
        pending
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves when the armed timer fires; pends forever when unarmed.
    ///
    /// Cancel-safe: dropping the future leaves the timer armed.
    pub async fn fired(&mut self) -> TimerHandle {
        let (Some(handle), Some(timer)) = (self.armed, self.sleep.as_mut()) else {
            return future::pending().await;
        };
        timer.await;
        self.clear();
        handle
    }

    fn clear(&mut self) {
        self.sleep = None;
        self.deadline = None;
        self.armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
    }

    #[test]
    fn idle_47s_with_10s_interval_skips_four() {
        let c = compute_catch_up_delay(at(0), 10, at(47));
        assert_eq!(c.steps_to_skip, 4);
        assert_eq!(c.delay, Duration::from_secs(3));
    }

    #[test]
    fn within_first_interval_skips_nothing() {
        let c = compute_catch_up_delay(at(0), 10, at(4));
        assert_eq!(c.steps_to_skip, 0);
        assert_eq!(c.delay, Duration::from_secs(6));
    }

    #[test]
    fn exact_multiple_waits_a_full_interval() {
        let c = compute_catch_up_delay(at(0), 5, at(15));
        assert_eq!(c.steps_to_skip, 3);
        assert_eq!(c.delay, Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_is_treated_as_one_second() {
        let c = compute_catch_up_delay(at(0), 0, at(3));
        assert_eq!(c.steps_to_skip, 3);
        assert_eq!(c.delay, Duration::from_secs(1));
    }

    #[test]
    fn future_timestamp_counts_as_no_elapsed_time() {
        let c = compute_catch_up_delay(at(100), 10, at(0));
        assert_eq!(c.steps_to_skip, 0);
        assert_eq!(c.delay, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_timer() {
        let mut s = Scheduler::new();
        let first = s.schedule_after(Duration::from_secs(10));
        let second = s.schedule_after(Duration::from_secs(2));
        assert!(!s.cancel(first), "replaced handle must not cancel the new one");
        assert_eq!(s.remaining(), Some(Duration::from_secs(2)));
        assert_eq!(s.fired().await, second);
        assert!(!s.is_armed());
        assert!(!s.cancel(second), "cancel after firing is a no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut s = Scheduler::new();
        let h = s.schedule_after(Duration::from_secs(1));
        assert!(s.cancel(h));
        assert!(!s.cancel(h));
        let res = tokio::time::timeout(Duration::from_secs(5), s.fired()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(at(0));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(clock.now(), at(7));
    }
}
