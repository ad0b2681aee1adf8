//! Timer scheduling
//!
//! Thin wrappers over the runtime's timer driver: one-shot delays for the
//! handshake-wait job and fixed-rate ticks for keep-alive. Both return a
//! [`TaskHandle`] whose `cancel` is a best-effort interrupt, and which
//! aborts the task when dropped so an abandoned connection cannot leak
//! its timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Cancellable handle to a scheduled task
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Cancel the task; best-effort, the current tick may still finish
    pub fn cancel(&self) {
        self.inner.abort();
    }

    /// Whether the task has run to completion or been cancelled
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.inner.abort();
    }
}

/// Run `task` once after `delay`
pub fn schedule_once<F>(delay: Duration, task: F) -> TaskHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let inner = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    });
    TaskHandle { inner }
}

/// Run `task` at a fixed rate, first firing one period from now
///
/// A tick that overruns its period delays the next tick instead of
/// bursting to catch up.
pub fn schedule_fixed_rate<F, Fut>(period: Duration, mut task: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let inner = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            task().await;
        }
    });
    TaskHandle { inner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_fires_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);

        let _handle = schedule_once(Duration::from_millis(100), async move {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_cancel() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);

        let handle = schedule_once(Duration::from_millis(100), async move {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_ticks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks2 = Arc::clone(&ticks);

        let handle = schedule_fixed_rate(Duration::from_millis(100), move || {
            let ticks = Arc::clone(&ticks2);
            async move {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        });

        // First tick comes one full period in, not immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
