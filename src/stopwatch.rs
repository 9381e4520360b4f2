//! Inactivity stopwatch.
//!
//! Built on [`tokio::time::Instant`], which is monotonic and follows tokio's virtual
//! clock when the runtime is paused, so timeout behaviour can be tested without real
//! waiting.

use tokio::time::{Duration, Instant};

/// Measures time elapsed since the last [`Stopwatch::reset`].
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Start a stopwatch at the current instant.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Take the current instant as the new reference point.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Time since the reference point.
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// Seconds since the reference point, with sub-second precision.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Whether more than `timeout` has passed. A zero timeout never expires.
    pub fn exceeded(&self, timeout: Duration) -> bool {
        !timeout.is_zero() && self.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_follows_clock() {
        let watch = Stopwatch::start();
        tokio::time::advance(Duration::from_millis(1_250)).await;
        assert!((watch.elapsed_seconds() - 1.25).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_borrow_is_handled() {
        // 0.9s then 0.3s crosses a whole-second boundary with a smaller nanosecond part.
        let watch = Stopwatch::start();
        tokio::time::advance(Duration::from_millis(900)).await;
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!((watch.elapsed_seconds() - 1.2).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_count() {
        let mut watch = Stopwatch::start();
        tokio::time::advance(Duration::from_secs(3)).await;
        watch.reset();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(watch.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_expires() {
        let watch = Stopwatch::start();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!watch.exceeded(Duration::ZERO));
        assert!(watch.exceeded(Duration::from_secs(2)));
    }
}
