//! Fixed-delay polling loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// One unit of periodic work.
#[async_trait]
pub trait CycleTask: Send + Sync {
    type Error: Display + Send;

    async fn run_cycle(&self) -> Result<(), Self::Error>;
}

/// Runs a [`CycleTask`] repeatedly with a pause between cycles.
///
/// A cycle always runs to completion. Shutdown is noticed between cycles
/// and ends the pause early.
pub struct Scheduler {
    delay: Duration,
}

impl Scheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run cycles until `shutdown` resolves. Returns the number of cycles run.
    ///
    /// A failed cycle is logged and the loop carries on.
    pub async fn run<T, F>(&self, task: &T, shutdown: F) -> u64
    where
        T: CycleTask + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycles: u64 = 0;

        loop {
            cycles += 1;
            tracing::info!(cycle = cycles, "Starting cycle");
            if let Err(e) = task.run_cycle().await {
                tracing::error!(cycle = cycles, error = %e, "Cycle failed");
            }

            tracing::info!(
                cycle = cycles,
                next_run_in_secs = self.delay.as_secs(),
                "Cycle complete, waiting for next run"
            );

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(cycles = cycles, "Shutdown requested, stopping scheduler");
                    break;
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        cycles
    }

    /// Run a single cycle, surfacing its error.
    pub async fn run_once<T>(&self, task: &T) -> Result<(), T::Error>
    where
        T: CycleTask + ?Sized,
    {
        task.run_cycle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingTask {
        runs: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl CycleTask for CountingTask {
        type Error = String;

        async fn run_cycle(&self) -> Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct SlowTask {
        finished: AtomicBool,
    }

    #[async_trait]
    impl CycleTask for SlowTask {
        type Error = String;

        async fn run_cycle(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_delay_until_shutdown() {
        let task = CountingTask::default();
        let scheduler = Scheduler::new(Duration::from_secs(300));

        let cycles = scheduler
            .run(&task, tokio::time::sleep(Duration::from_secs(650)))
            .await;

        // Cycles start at t=0, t=300 and t=600
        assert_eq!(cycles, 3);
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_the_loop() {
        let task = CountingTask {
            fail: true,
            ..CountingTask::default()
        };
        let scheduler = Scheduler::new(Duration::from_secs(60));

        let cycles = scheduler
            .run(&task, tokio::time::sleep(Duration::from_secs(150)))
            .await;
        assert_eq!(cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_cycle() {
        let task = SlowTask {
            finished: AtomicBool::new(false),
        };
        let scheduler = Scheduler::new(Duration::from_secs(300));

        let cycles = scheduler
            .run(&task, tokio::time::sleep(Duration::from_secs(5)))
            .await;

        assert_eq!(cycles, 1);
        assert!(task.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_once_surfaces_error() {
        let task = CountingTask {
            fail: true,
            ..CountingTask::default()
        };
        let result = Scheduler::new(Duration::from_secs(1)).run_once(&task).await;
        assert_eq!(result, Err("boom".to_string()));
    }
}
