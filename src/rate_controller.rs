//! The adaptive rate controller.
//!
//! A single process-wide regulator of RPC pacing. Every outbound call goes
//! through `acquire()` before it is issued and reports its outcome through
//! one of `on_success` / `on_rate_limit` / `on_network_error` afterwards.
//! This is the sole source of backpressure in the core — no other component
//! sleeps on its own judgment.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

pub const MAX_RPC_CALLS_PER_SECOND: u32 = 25;
pub const RATE_WINDOW: Duration = Duration::from_secs(60);
pub const BASE_DELAY: Duration = Duration::from_millis(250);
pub const MIN_DELAY: Duration = Duration::from_millis(80);
pub const MAX_DELAY: Duration = Duration::from_secs(3);
pub const BATCH_SIZE_BASE: usize = 12;

const SUCCESS_THRESHOLD_FAST: u32 = 3;
const SUCCESS_THRESHOLD_OTHER: u32 = 5;
const DELAY_REDUCTION_FAST: f64 = 0.9;
const DELAY_REDUCTION_OTHER: f64 = 0.95;
const BACKOFF_MULTIPLIER: f64 = 1.3;
const BACKOFF_MULTIPLIER_REPEATED: f64 = 1.8;
const NETWORK_ERROR_MULTIPLIER: f64 = 1.2;
const REPEATED_429_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    /// Below 70% of the per-second budget measured over the rolling window.
    Fast,
    Normal,
    /// Above 90% of the per-second budget.
    Careful,
}

impl Mode {
    fn label(&self) -> &'static str {
        match self {
            Mode::Fast => "fast",
            Mode::Normal => "normal",
            Mode::Careful => "careful",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateControllerStats {
    pub current_delay: Duration,
    pub mode: Mode,
    pub success_count: u64,
    pub fail_count: u64,
    pub consecutive_successes: u32,
    pub recent_request_rate: usize,
    pub seconds_since_last_429: Option<f64>,
}

struct Inner {
    current_delay: Duration,
    mode: Mode,
    success_count: u64,
    fail_count: u64,
    consecutive_successes: u32,
    recent_requests: Vec<Instant>,
    last_429_at: Option<Instant>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            current_delay: BASE_DELAY,
            mode: Mode::Normal,
            success_count: 0,
            fail_count: 0,
            consecutive_successes: 0,
            recent_requests: Vec::new(),
            last_429_at: None,
        }
    }
}

/// Global pacing authority. Cheap to clone (wraps an `Arc` internally via
/// the caller holding it behind `Arc<RateController>`); instantiate one per
/// RPC endpoint if the core ever talks to more than one.
pub struct RateController {
    inner: Mutex<Inner>,
}

impl Default for RateController {
    fn default() -> Self {
        Self::new()
    }
}

impl RateController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Sleeps for `current_delay`, records the request time, and may flip
    /// `mode` based on the observed rate in the trailing 60s window.
    pub async fn acquire(&self) {
        let delay = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            inner
                .recent_requests
                .retain(|t| now.duration_since(*t) < RATE_WINDOW);
            inner.recent_requests.push(now);

            let rate = inner.recent_requests.len() as u32;
            if rate as f64 > MAX_RPC_CALLS_PER_SECOND as f64 * 0.9 {
                inner.mode = Mode::Careful;
            } else if (rate as f64) < MAX_RPC_CALLS_PER_SECOND as f64 * 0.7 {
                inner.mode = Mode::Fast;
            } else {
                inner.mode = Mode::Normal;
            }

            inner.current_delay
        };

        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.success_count += 1;
        inner.consecutive_successes += 1;

        let threshold = if inner.mode == Mode::Fast {
            SUCCESS_THRESHOLD_FAST
        } else {
            SUCCESS_THRESHOLD_OTHER
        };

        if inner.consecutive_successes >= threshold {
            let factor = if inner.mode == Mode::Fast {
                DELAY_REDUCTION_FAST
            } else {
                DELAY_REDUCTION_OTHER
            };
            let reduced = inner.current_delay.mul_f64(factor);
            let old = inner.current_delay;
            inner.current_delay = reduced.max(MIN_DELAY);
            inner.consecutive_successes = 0;

            if old != inner.current_delay {
                tracing::debug!(
                    mode = inner.mode.label(),
                    old_ms = old.as_millis() as u64,
                    new_ms = inner.current_delay.as_millis() as u64,
                    "reduced delay"
                );
            }
        }
    }

    pub async fn on_rate_limit(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_count += 1;
        inner.consecutive_successes = 0;

        let now = Instant::now();
        let recent_429 = inner
            .last_429_at
            .is_some_and(|t| now.duration_since(t) < REPEATED_429_WINDOW);
        inner.last_429_at = Some(now);

        let old = inner.current_delay;
        if recent_429 {
            inner.current_delay = inner.current_delay.mul_f64(BACKOFF_MULTIPLIER_REPEATED).min(MAX_DELAY);
            inner.mode = Mode::Careful;
        } else {
            inner.current_delay = inner.current_delay.mul_f64(BACKOFF_MULTIPLIER).min(MAX_DELAY);
        }

        tracing::warn!(
            old_ms = old.as_millis() as u64,
            new_ms = inner.current_delay.as_millis() as u64,
            mode = inner.mode.label(),
            "rate limit hit"
        );
    }

    pub async fn on_network_error(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_count += 1;
        inner.consecutive_successes = 0;

        let old = inner.current_delay;
        inner.current_delay = inner.current_delay.mul_f64(NETWORK_ERROR_MULTIPLIER).min(MAX_DELAY);

        tracing::debug!(
            old_ms = old.as_millis() as u64,
            new_ms = inner.current_delay.as_millis() as u64,
            "network error backoff"
        );
    }

    pub async fn mode(&self) -> Mode {
        self.inner.lock().await.mode
    }

    /// Fast mode widens the batch (BASE+4, capped at 20); careful mode
    /// narrows it (BASE-3, floored at 6); normal mode uses BASE as-is.
    pub async fn optimal_batch_size(&self) -> usize {
        match self.inner.lock().await.mode {
            Mode::Fast => (BATCH_SIZE_BASE + 4).min(20),
            Mode::Careful => BATCH_SIZE_BASE.saturating_sub(3).max(6),
            Mode::Normal => BATCH_SIZE_BASE,
        }
    }

    pub async fn stats(&self) -> RateControllerStats {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        RateControllerStats {
            current_delay: inner.current_delay,
            mode: inner.mode,
            success_count: inner.success_count,
            fail_count: inner.fail_count,
            consecutive_successes: inner.consecutive_successes,
            recent_request_rate: inner
                .recent_requests
                .iter()
                .filter(|t| now.duration_since(**t) < Duration::from_secs(10))
                .count(),
            seconds_since_last_429: inner
                .last_429_at
                .map(|t| now.duration_since(t).as_secs_f64()),
        }
    }
}

/// Batch-delay multiplier applied between batches within a cycle.
pub fn batch_delay_factor(mode: Mode) -> f64 {
    match mode {
        Mode::Fast => 0.7,
        Mode::Normal => 1.0,
        Mode::Careful => 1.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delay_stays_within_bounds_under_repeated_rate_limits() {
        let rc = RateController::new();
        for _ in 0..8 {
            rc.on_rate_limit().await;
        }
        let stats = rc.stats().await;
        assert!(stats.current_delay <= MAX_DELAY);
        assert!(stats.current_delay >= MIN_DELAY);
        assert_eq!(stats.mode, Mode::Careful);
    }

    #[tokio::test]
    async fn optimal_batch_size_is_monotone_in_mode() {
        let rc = RateController::new();
        for _ in 0..8 {
            rc.on_rate_limit().await;
        }
        let careful_batch = rc.optimal_batch_size().await;
        assert!(careful_batch <= 9);
        assert!(careful_batch <= BATCH_SIZE_BASE);
    }

    #[tokio::test]
    async fn successes_reduce_delay_but_never_below_min() {
        let rc = RateController::new();
        for _ in 0..50 {
            rc.on_success().await;
        }
        let stats = rc.stats().await;
        assert!(stats.current_delay >= MIN_DELAY);
    }

    #[tokio::test]
    async fn network_errors_increase_delay_and_cap_at_max() {
        let rc = RateController::new();
        for _ in 0..50 {
            rc.on_network_error().await;
        }
        let stats = rc.stats().await;
        assert_eq!(stats.current_delay, MAX_DELAY);
    }
}
