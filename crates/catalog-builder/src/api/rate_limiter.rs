//! Single-flight request queue.
//!
//! Every outbound metadata call passes through one FIFO gate. The gap is
//! measured from the completion of the previous call to the start of the
//! next, so a slow response never delays the next caller beyond the
//! configured spacing.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// FIFO rate limiter serializing calls with a minimum completion-to-start gap
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum gap between calls
    min_spacing: Duration,
    /// Completion time of the previous call; the lock is the queue itself
    last_completed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_completed: Mutex::new(None),
        }
    }

    /// Run `request` once every earlier caller has finished and the spacing
    /// has elapsed, resolving with the request's own output.
    ///
    /// Callers are admitted in the order they call `enqueue` (tokio's mutex
    /// is fair).
    pub async fn enqueue<F, Fut, T>(&self, request: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_completed = self.last_completed.lock().await;

        if let Some(done) = *last_completed {
            let elapsed = done.elapsed();
            if elapsed < self.min_spacing {
                let wait_time = self.min_spacing - elapsed;
                tracing::debug!(
                    wait_ms = wait_time.as_millis(),
                    "Rate limit: waiting for call spacing"
                );
                sleep(wait_time).await;
            }
        }

        let output = request().await;

        *last_completed = Some(Instant::now());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_in_submission_order() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        let order = StdMutex::new(Vec::new());

        let call = |name: &'static str, work_ms: u64| {
            let order = &order;
            let limiter = &limiter;
            async move {
                limiter
                    .enqueue(|| async move {
                        order.lock().unwrap().push(name);
                        sleep(Duration::from_millis(work_ms)).await;
                        name
                    })
                    .await
            }
        };

        // B would resolve fastest if it were allowed to run early
        let (a, b, c) = tokio::join!(call("A", 300), call("B", 1), call("C", 50));

        assert_eq!((a, b, c), ("A", "B", "C"));
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_measured_from_completion() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let starts = StdMutex::new(Vec::new());
        let origin = Instant::now();

        let call = |work_ms: u64| {
            let starts = &starts;
            let limiter = &limiter;
            async move {
                limiter
                    .enqueue(|| async move {
                        starts.lock().unwrap().push(origin.elapsed());
                        sleep(Duration::from_millis(work_ms)).await;
                    })
                    .await
            }
        };

        tokio::join!(call(500), call(10));

        let starts = starts.lock().unwrap();
        // First call ends at 500ms; the second starts one spacing later.
        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(600));
        assert!(starts[1] < Duration::from_millis(650));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let origin = Instant::now();

        limiter.enqueue(|| async {}).await;

        assert!(origin.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_enqueue_returns_inner_error() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let result: Result<u32, &str> = limiter.enqueue(|| async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
    }
}
