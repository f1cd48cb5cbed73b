//! Independently scheduled background tasks.
//!
//! Each task ticks on its own interval. A tick that fires while the
//! previous run of the same task is still active is skipped, never queued.
//! The work itself runs on the blocking pool so long sweeps never stall
//! the runtime.

use crate::core::config::SchedulerConfig;
use crate::core::{Result, RollupError};
use crate::warehouse::Warehouse;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The four periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundTask {
    Archival,
    Purge,
    Compression,
    Optimization,
}

impl BackgroundTask {
    pub const ALL: [BackgroundTask; 4] = [
        BackgroundTask::Archival,
        BackgroundTask::Purge,
        BackgroundTask::Compression,
        BackgroundTask::Optimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundTask::Archival => "archival",
            BackgroundTask::Purge => "purge",
            BackgroundTask::Compression => "compression",
            BackgroundTask::Optimization => "optimization",
        }
    }

    pub fn interval(&self, config: &SchedulerConfig) -> Duration {
        match self {
            BackgroundTask::Archival => config.archival_interval,
            BackgroundTask::Purge => config.purge_interval,
            BackgroundTask::Compression => config.compression_interval,
            BackgroundTask::Optimization => config.optimization_interval,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes the work behind a background task.
pub trait TaskRunner: Send + Sync + 'static {
    fn run_task(&self, task: BackgroundTask) -> Result<()>;
}

impl TaskRunner for Warehouse {
    fn run_task(&self, task: BackgroundTask) -> Result<()> {
        let report = match task {
            BackgroundTask::Archival => self.run_archival_sweep(),
            BackgroundTask::Purge => self.run_purge_sweep(),
            BackgroundTask::Compression => self.run_compression_sweep(),
            BackgroundTask::Optimization => return self.run_optimization_cycle().map(|_| ()),
        };
        if report.cancelled {
            return Err(RollupError::Cancelled);
        }
        Ok(())
    }
}

/// Counters for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub runs: u64,
    pub skips: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct TaskState {
    running: AtomicBool,
    runs: AtomicU64,
    skips: AtomicU64,
    failures: AtomicU64,
}

impl TaskState {
    /// Claim the task; records a skip if it is already running.
    fn try_claim(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.runs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.skips.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    fn finish(&self, task: BackgroundTask, result: Result<()>) {
        match result {
            Ok(()) => debug!(task = %task, "Background task finished"),
            Err(RollupError::Cancelled) => debug!(task = %task, "Background task cancelled"),
            Err(RollupError::OptimizationInProgress) => {
                debug!(task = %task, "Optimization already running elsewhere");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(task = %task, error = %e, "Background task failed");
            }
        }
        self.running.store(false, Ordering::Release);
    }

    fn stats(&self) -> TaskStats {
        TaskStats {
            runs: self.runs.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Drives the background tasks until cancelled.
pub struct Scheduler {
    runner: Arc<dyn TaskRunner>,
    config: SchedulerConfig,
    states: Arc<[TaskState; 4]>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Dispatched runs that may still be executing
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn TaskRunner>, config: SchedulerConfig, cancel: CancellationToken) -> Self {
        Self {
            runner,
            config,
            states: Arc::new(Default::default()),
            handles: Mutex::new(Vec::new()),
            in_flight: Arc::new(Mutex::new(Vec::new())),
            cancel,
        }
    }

    /// Scheduler for a warehouse, stopped by the warehouse's shutdown token.
    pub fn for_warehouse(warehouse: &Arc<Warehouse>) -> Self {
        let config = warehouse.config().scheduler.clone();
        let cancel = warehouse.shutdown_token();
        let runner: Arc<dyn TaskRunner> = Arc::clone(warehouse) as Arc<dyn TaskRunner>;
        Self::new(runner, config, cancel)
    }

    /// Spawn one tick loop per task. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for task in BackgroundTask::ALL {
            let period = task.interval(&self.config);
            let runner = Arc::clone(&self.runner);
            let states = Arc::clone(&self.states);
            let in_flight = Arc::clone(&self.in_flight);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            Self::dispatch(task, &runner, &states, &in_flight);
                        }
                        _ = cancel.cancelled() => {
                            debug!(task = %task, "Tick loop stopped");
                            break;
                        }
                    }
                }
            }));
        }
        info!(tasks = handles.len(), "Scheduler started");
    }

    fn dispatch(
        task: BackgroundTask,
        runner: &Arc<dyn TaskRunner>,
        states: &Arc<[TaskState; 4]>,
        in_flight: &Mutex<Vec<JoinHandle<()>>>,
    ) {
        if !states[task.index()].try_claim() {
            debug!(task = %task, "Previous run still active, skipping tick");
            return;
        }

        let runner = Arc::clone(runner);
        let states = Arc::clone(states);
        let handle = tokio::spawn(async move {
            let work_runner = Arc::clone(&runner);
            let result = tokio::task::spawn_blocking(move || work_runner.run_task(task))
                .await
                .map_err(RollupError::from)
                .and_then(|r| r);
            states[task.index()].finish(task, result);
        });

        let mut in_flight = in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Run `task` once on the calling thread. Returns false if the task
    /// was already running and the call was skipped.
    pub fn run_now(&self, task: BackgroundTask) -> bool {
        let state = &self.states[task.index()];
        if !state.try_claim() {
            return false;
        }
        state.finish(task, self.runner.run_task(task));
        true
    }

    pub fn stats(&self, task: BackgroundTask) -> TaskStats {
        self.states[task.index()].stats()
    }

    pub fn is_running(&self, task: BackgroundTask) -> bool {
        self.states[task.index()].running.load(Ordering::Acquire)
    }

    /// Cancel the tick loops and wait for them and for any dispatched run
    /// to finish. Running sweeps observe the same token and stop at their
    /// next partition boundary.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Tick loop panicked");
            }
        }

        let in_flight: Vec<_> = self.in_flight.lock().drain(..).collect();
        for handle in in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "Background run panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRunner {
        calls: AtomicU64,
    }

    impl TaskRunner for CountingRunner {
        fn run_task(&self, _task: BackgroundTask) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingRunner;

    impl TaskRunner for FailingRunner {
        fn run_task(&self, task: BackgroundTask) -> Result<()> {
            Err(RollupError::lifecycle(task, "boom"))
        }
    }

    #[test]
    fn test_run_now_counts_runs() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicU64::new(0),
        });
        let scheduler = Scheduler::new(
            Arc::clone(&runner) as Arc<dyn TaskRunner>,
            SchedulerConfig::default(),
            CancellationToken::new(),
        );

        assert!(scheduler.run_now(BackgroundTask::Purge));
        assert!(scheduler.run_now(BackgroundTask::Purge));
        assert_eq!(scheduler.stats(BackgroundTask::Purge).runs, 2);
        assert_eq!(scheduler.stats(BackgroundTask::Archival), TaskStats::default());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let scheduler = Scheduler::new(
            Arc::new(FailingRunner),
            SchedulerConfig::default(),
            CancellationToken::new(),
        );
        assert!(scheduler.run_now(BackgroundTask::Archival));
        assert!(scheduler.run_now(BackgroundTask::Archival));

        let stats = scheduler.stats(BackgroundTask::Archival);
        assert_eq!(stats.failures, 2);
        assert!(!scheduler.is_running(BackgroundTask::Archival));
    }

    #[test]
    fn test_claim_skips_while_running() {
        let state = TaskState::default();
        assert!(state.try_claim());
        assert!(!state.try_claim());
        state.finish(BackgroundTask::Compression, Ok(()));
        assert!(state.try_claim());

        let stats = state.stats();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.skips, 1);
    }

    #[test]
    fn test_intervals_follow_config() {
        let config = SchedulerConfig::default();
        assert_eq!(BackgroundTask::Purge.interval(&config), config.purge_interval);
        assert_eq!(
            BackgroundTask::Optimization.interval(&config),
            Duration::from_secs(3600)
        );
    }
}
