// =============================================================================
// Rate Limiter — rolling-window request pacing for upstream data APIs
// =============================================================================
//
// Upstream market-data APIs enforce per-minute request quotas. The limiter
// keeps a rolling 60 s window of send timestamps plus a small inter-request
// spacing. On HTTP 429 the caller invokes `penalize` and the limiter holds
// all requests for the cooldown (~65 s) before retrying.
//
// Locking discipline: the mutex is only held to inspect/update the window;
// all sleeping happens with the lock released.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Rolling window length.
const WINDOW: Duration = Duration::from_secs(60);

/// Cooldown applied after an upstream 429.
const PENALTY: Duration = Duration::from_secs(65);

/// Thread-safe rolling-window rate limiter.
pub struct RateLimiter {
    max_per_window: usize,
    spacing: Duration,
    inner: Mutex<Window>,
}

struct Window {
    sent: VecDeque<Instant>,
    hold_until: Option<Instant>,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    /// `max_per_min` requests per rolling minute with `spacing_ms` between
    /// consecutive requests.
    pub fn new(max_per_min: usize, spacing_ms: u64) -> Self {
        Self {
            max_per_window: max_per_min.max(1),
            spacing: Duration::from_millis(spacing_ms),
            inner: Mutex::new(Window {
                sent: VecDeque::new(),
                hold_until: None,
                last_sent: None,
            }),
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut w = self.inner.lock();
                let now = Instant::now();

                // Expire window entries older than 60 s.
                while let Some(front) = w.sent.front() {
                    if now.duration_since(*front) > WINDOW {
                        w.sent.pop_front();
                    } else {
                        break;
                    }
                }

                if let Some(until) = w.hold_until {
                    if now < until {
                        Some(until - now)
                    } else {
                        w.hold_until = None;
                        None
                    }
                } else if w.sent.len() >= self.max_per_window {
                    // Oldest entry leaving the window frees a slot.
                    w.sent.front().map(|front| WINDOW - now.duration_since(*front))
                } else if let Some(last) = w.last_sent {
                    let since = now.duration_since(last);
                    if since < self.spacing {
                        Some(self.spacing - since)
                    } else {
                        w.sent.push_back(now);
                        w.last_sent = Some(now);
                        None
                    }
                } else {
                    w.sent.push_back(now);
                    w.last_sent = Some(now);
                    None
                }
            };

            match wait {
                None => return,
                Some(d) => {
                    debug!(wait_ms = d.as_millis() as u64, "rate limiter backing off");
                    tokio::time::sleep(d).await;
                }
            }
        }
    }

    /// Record an upstream 429 and hold all traffic for the cooldown.
    pub fn penalize(&self) {
        let mut w = self.inner.lock();
        w.hold_until = Some(Instant::now() + PENALTY);
        warn!(
            cooldown_s = PENALTY.as_secs(),
            "upstream rate limit hit — pausing requests"
        );
    }

    /// Number of requests currently inside the rolling window.
    pub fn in_flight_window(&self) -> usize {
        let mut w = self.inner.lock();
        let now = Instant::now();
        while let Some(front) = w.sent.front() {
            if now.duration_since(*front) > WINDOW {
                w.sent.pop_front();
            } else {
                break;
            }
        }
        w.sent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_counts_requests() {
        let rl = RateLimiter::new(10, 0);
        rl.acquire().await;
        rl.acquire().await;
        assert_eq!(rl.in_flight_window(), 2);
    }

    #[tokio::test]
    async fn spacing_is_enforced() {
        let rl = RateLimiter::new(100, 30);
        let start = Instant::now();
        rl.acquire().await;
        rl.acquire().await;
        rl.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_holds_traffic() {
        let rl = RateLimiter::new(100, 0);
        rl.acquire().await;
        rl.penalize();

        let start = tokio::time::Instant::now();
        rl.acquire().await;
        // With the paused clock the sleep is auto-advanced; elapsed virtual
        // time must cover the 65 s cooldown.
        assert!(start.elapsed() >= Duration::from_secs(65));
    }
}
