//! Periodic Task: long-lived sleep-then-act loop with a cooperative stop flag
//!
//! Stopping never aborts the task. A task that is sleeping finishes the
//! sleep, sees the cleared flag and exits without running the action again.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct PeriodicTask {
    name: &'static str,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns the loop on the current runtime. The action may return
    /// `ControlFlow::Break` to end the loop on its own (e.g. owner dropped).
    pub fn spawn<F, Fut>(name: &'static str, every: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!("[{}] started, interval {:?}", name, every);
            while flag.load(Ordering::SeqCst) {
                tokio::time::sleep(every).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if action().await.is_break() {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::debug!("[{}] exiting", name);
        });

        Self { name, running, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Requests the loop to stop after its current sleep
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn runs_after_each_sleep_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = PeriodicTask::spawn("ticker", Duration::from_millis(20), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        task.stop();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {}", seen);

        // One more interval lets the loop observe the flag
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(task.is_finished());
        assert!(ticks.load(Ordering::SeqCst) <= seen + 1);
    }

    #[tokio::test]
    async fn break_ends_the_loop() {
        let task = PeriodicTask::spawn("once", Duration::from_millis(5), || async { ControlFlow::Break(()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_finished());
        assert!(!task.is_running());
    }
}
