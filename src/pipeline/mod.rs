// src/pipeline/mod.rs
//
// The background update pipeline: an explicit ordered list of stages run
// strictly in sequence on a fixed interval by one dedicated task.
//
// A failing stage is logged and counted but never blocks the stages after
// it. Runs never overlap: the loop task is the only place stages execute.

use crate::traits::SharedStage;
use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Bounded wait for the loop task when stopping.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Small status snapshot served to external queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub last_update: String,
    pub next_update_in_seconds: u64,
    pub interval_seconds: u64,
}

struct StatusState {
    phase: String,
    last_update: Option<String>,
    next_run_at: Option<Instant>,
}

struct SchedulerInner {
    stages: Vec<SharedStage>,
    interval: Duration,
    status: Mutex<StatusState>,
    stop_requested: AtomicBool,
}

/// Owns the pipeline lifecycle: create → start → stop → drop.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates a scheduler over an ordered stage list.
    pub fn new(stages: Vec<SharedStage>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                stages,
                interval,
                status: Mutex::new(StatusState {
                    phase: "Idle".to_string(),
                    last_update: None,
                    next_run_at: None,
                }),
                stop_requested: AtomicBool::new(false),
            }),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Starts the background loop; the first run happens immediately.
    /// Starting an already-running scheduler is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler: already running");
            return;
        }
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut next_run = Instant::now();
            inner.set_next_run(next_run);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(next_run) => {}
                    _ = shutdown.notified() => break,
                }
                if inner.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                inner.run_pipeline().await;
                // A stop that arrived mid-run must not wait out the next
                // sleep.
                if inner.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                next_run = Instant::now() + inner.interval;
            }
            info!("scheduler: loop exited");
        });
        *lock(&self.handle) = Some(handle);
        info!(
            "scheduler: started, interval {}s, first run now",
            self.inner.interval.as_secs()
        );
    }

    /// Signals the loop to exit and waits for it with a bounded timeout.
    /// A stage that never returns can hold shutdown up to that bound;
    /// the overrun is logged.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        // notify_one buffers a permit, so a loop that is mid-run still sees
        // the signal when it next reaches the sleep.
        self.shutdown.notify_one();

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("scheduler: stopped"),
                Ok(Err(e)) => error!("scheduler: loop task failed: {}", e),
                Err(_) => error!(
                    "scheduler: loop did not exit within {}s; abandoning it",
                    STOP_JOIN_TIMEOUT.as_secs()
                ),
            }
        }
    }

    /// Runs the full stage sequence once, outside the schedule.
    pub async fn run_once(&self) {
        self.inner.run_pipeline().await;
    }

    /// Returns the current status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.snapshot()
    }
}

impl SchedulerInner {
    async fn run_pipeline(&self) {
        let started = std::time::Instant::now();
        info!("pipeline: run started");
        {
            let mut st = lock(&self.status);
            st.phase = "Running...".to_string();
        }

        let total = self.stages.len();
        let mut successes = 0usize;
        for stage in &self.stages {
            // Stop is only observed between stages; a stage in flight
            // always finishes.
            if self.stop_requested.load(Ordering::SeqCst) {
                warn!("pipeline: stop requested, remaining stages skipped");
                break;
            }
            info!("pipeline: running {}", stage.name());
            match stage.run().await {
                Ok(report) => {
                    successes += 1;
                    info!("pipeline: {} completed ({})", stage.name(), report);
                }
                Err(e) => {
                    error!("pipeline: {} failed: {}", stage.name(), e);
                }
            }
        }

        let finished_label = Local::now().format("%Y/%m/%d %H:%M:%S").to_string();
        {
            let mut st = lock(&self.status);
            st.phase = if successes == total {
                format!("Success ({}/{})", successes, total)
            } else {
                format!("Failed ({}/{})", successes, total)
            };
            st.last_update = Some(finished_label);
            st.next_run_at = Some(Instant::now() + self.interval);
        }
        info!(
            "pipeline: run finished in {:.1}s ({}/{} stages succeeded)",
            started.elapsed().as_secs_f64(),
            successes,
            total
        );
    }

    fn set_next_run(&self, at: Instant) {
        lock(&self.status).next_run_at = Some(at);
    }

    fn snapshot(&self) -> StatusSnapshot {
        let st = lock(&self.status);
        let next_in = match st.next_run_at {
            Some(at) => at.saturating_duration_since(Instant::now()).as_secs(),
            None => self.interval.as_secs(),
        };
        StatusSnapshot {
            status: st.phase.clone(),
            last_update: st.last_update.clone().unwrap_or_else(|| "Never".to_string()),
            next_update_in_seconds: next_in,
            interval_seconds: self.interval.as_secs(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Stage, StageError, StageReport};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MockStage {
        name: &'static str,
        fail: bool,
        runs: AtomicUsize,
    }

    impl MockStage {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Stage for MockStage {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<StageReport, StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StageError::Other("boom".to_string()))
            } else {
                Ok(StageReport {
                    rows: 1,
                    skipped: 0,
                    cache_hit: false,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_failing_stage_does_not_block_later_stages() {
        let first = MockStage::new("first", false);
        let broken = MockStage::new("broken", true);
        let last = MockStage::new("last", false);
        let scheduler = Scheduler::new(
            vec![
                first.clone() as SharedStage,
                broken.clone() as SharedStage,
                last.clone() as SharedStage,
            ],
            Duration::from_secs(3600),
        );

        scheduler.run_once().await;

        assert_eq!(first.runs.load(Ordering::SeqCst), 1);
        assert_eq!(broken.runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.runs.load(Ordering::SeqCst), 1);

        let status = scheduler.status();
        assert_eq!(status.status, "Failed (2/3)");
        assert_ne!(status.last_update, "Never");
    }

    #[tokio::test]
    async fn test_all_stages_succeeding_reports_success() {
        let a = MockStage::new("a", false);
        let b = MockStage::new("b", false);
        let scheduler = Scheduler::new(
            vec![a as SharedStage, b as SharedStage],
            Duration::from_secs(60),
        );

        scheduler.run_once().await;

        let status = scheduler.status();
        assert_eq!(status.status, "Success (2/2)");
        assert_eq!(status.interval_seconds, 60);
        assert!(status.next_update_in_seconds <= 60);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_joins() {
        let stage = MockStage::new("only", false);
        let scheduler = Scheduler::new(vec![stage.clone() as SharedStage], Duration::from_secs(3600));

        scheduler.start();
        scheduler.start(); // no-op

        // Give the immediate first run time to complete.
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        assert_eq!(stage.runs.load(Ordering::SeqCst), 1);

        // Stopping again is harmless.
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_status_before_first_run() {
        let scheduler = Scheduler::new(vec![], Duration::from_secs(120));
        let status = scheduler.status();
        assert_eq!(status.status, "Idle");
        assert_eq!(status.last_update, "Never");
        assert_eq!(status.interval_seconds, 120);
    }
}
