//! Process-wide sliding-window rate limiter for renderer calls.
//!
//! Admission times of the last `R` acquisitions are kept in a log. A caller
//! is admitted when fewer than `R` admissions happened in the trailing window;
//! otherwise it sleeps until the oldest one leaves the window. Waiters queue
//! on a tokio `Mutex`, which hands the lock out in FIFO order, so admission
//! follows arrival. Dropping a waiting `acquire` future consumes nothing.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `requests` is clamped to at least one.
    pub fn new(requests: usize, window: Duration) -> Self {
        let requests = requests.max(1);
        Self {
            requests,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(requests)),
        }
    }

    /// Wait for a slot. The admission is recorded only when this returns.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while admitted
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                admitted.pop_front();
            }
            if admitted.len() < self.requests {
                admitted.push_back(now);
                return;
            }
            if let Some(oldest) = admitted.front().copied() {
                tokio::time::sleep_until(oldest + self.window).await;
            }
        }
    }

    /// Admissions currently inside the window.
    pub async fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().await;
        let now = Instant::now();
        admitted
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }
}
