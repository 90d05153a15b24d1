//! Blocking wait-for-condition primitive.
//!
//! Browser synchronization (content markers, challenge clearance) is expressed
//! as "poll a condition until it holds or a timeout elapses". The clock is a
//! parameter so both the primitive and the challenge state machine can be
//! driven by [`ManualClock`] in tests without real sleeping.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: `sleep` advances time instantly.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Poll `condition` every `poll` until it returns true or `timeout` elapses.
///
/// The condition is always checked at least once, and once more after the
/// deadline has passed, so a condition that becomes true during the final
/// sleep is still reported as ready.
pub fn wait_until<F>(clock: &dyn Clock, timeout: Duration, poll: Duration, mut condition: F) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let deadline = clock.now() + timeout;
    loop {
        if condition() {
            return WaitOutcome::Ready;
        }
        let now = clock.now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let remaining = deadline - now;
        clock.sleep(poll.min(remaining).max(Duration::from_millis(1)));
    }
}
