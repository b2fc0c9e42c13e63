//! Recurring task scheduler.
//!
//! One dispatch task wakes on a fixed tick, collects the jobs whose due time
//! has passed and hands each one to a bounded worker pool. The dispatch loop
//! never awaits a job body, so a slow job only ever occupies a worker slot.
//!
//! Invariants:
//! - Job names are unique; re-adding a name replaces the old entry.
//! - A job fires at most once per tick and its next due time is advanced by
//!   exactly one interval from the previous due time.
//! - A job whose previous run is still executing skips the firing instead of
//!   queueing a second concurrent run.
//! - `stop()` returns only once every submitted run has finished.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use common::Result;

use crate::interval::Interval;
use crate::task::{Task, TaskArgs};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on job bodies executing at the same time.
    pub max_workers: usize,
    /// How often the dispatch loop wakes to look for due jobs.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            tick: Duration::from_secs(1),
        }
    }
}

/// Read-only view of one registered job.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub interval: Interval,
    pub args: TaskArgs,
}

struct ScheduledJob {
    interval: Interval,
    task: Arc<dyn Task>,
    next_due: Instant,
    in_flight: Arc<AtomicBool>,
}

/// A job picked for this tick, holding its in-flight flag until the run ends.
struct DueJob {
    name: String,
    task: Arc<dyn Task>,
    guard: InFlightGuard,
}

/// Clears a job's in-flight flag when its run ends, including by panic.
struct InFlightGuard {
    name: String,
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(task = %self.name, "Task panicked");
        }
        self.flag.store(false, Ordering::Release);
    }
}

struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<String, ScheduledJob>>>;

/// In-memory scheduler of named, interval-based recurring tasks.
///
/// Construct one per process and share it by reference; nothing here is
/// global. Must be used from within a tokio runtime.
pub struct TaskScheduler {
    jobs: JobTable,
    config: SchedulerConfig,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            config: SchedulerConfig {
                max_workers: config.max_workers.max(1),
                tick: config.tick,
            },
            dispatcher: Mutex::new(None),
        }
    }

    /// Register `task` under `name`, first due one `interval` from now.
    ///
    /// A malformed interval is rejected here and nothing is registered. An
    /// existing job with the same name is replaced: its schedule entry is
    /// dropped before the new one is inserted, so the name never fires twice
    /// for one due time.
    pub async fn add_task<T: Task>(&self, name: impl Into<String>, interval: &str, task: T) -> Result<()> {
        let name = name.into();
        let interval: Interval = interval.parse().inspect_err(|e| {
            error!(task = %name, error = %e, "Rejected task registration");
        })?;

        let mut jobs = self.jobs.lock().await;
        // A replacement inherits the in-flight flag so it cannot overlap a
        // run of the entry it replaces.
        let in_flight = match jobs.remove(&name) {
            Some(previous) => {
                warn!(task = %name, "Task already exists, replacing it");
                previous.in_flight
            }
            None => Arc::new(AtomicBool::new(false)),
        };
        jobs.insert(
            name.clone(),
            ScheduledJob {
                interval,
                task: Arc::new(task),
                next_due: Instant::now() + interval.as_duration(),
                in_flight,
            },
        );
        info!(task = %name, interval = %interval, "Task added");
        Ok(())
    }

    /// Cancel and forget `name`. Unknown names are logged and ignored. A run
    /// already in progress is left to finish.
    pub async fn remove_task(&self, name: &str) {
        if self.jobs.lock().await.remove(name).is_some() {
            info!(task = %name, "Task removed");
        } else {
            warn!(task = %name, "Cannot remove unknown task");
        }
    }

    /// Snapshot of every registered job: interval and bound arguments.
    pub async fn get_tasks(&self) -> BTreeMap<String, TaskInfo> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|(name, job)| {
                (
                    name.clone(),
                    TaskInfo {
                        interval: job.interval,
                        args: job.task.args(),
                    },
                )
            })
            .collect()
    }

    /// Start the dispatch loop in the background and return immediately.
    /// Calling this while already running does nothing.
    pub async fn run(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            warn!("Scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = Arc::new(Semaphore::new(self.config.max_workers));
        let handle = tokio::spawn(dispatch_loop(
            self.jobs.clone(),
            workers,
            self.config.tick,
            shutdown_rx,
        ));
        *dispatcher = Some(Dispatcher { shutdown_tx, handle });
        info!(
            max_workers = self.config.max_workers,
            tick_ms = self.config.tick.as_millis() as u64,
            "Scheduler started"
        );
    }

    /// Stop dispatching and wait for every submitted run to finish.
    ///
    /// In-flight job bodies are not interrupted; this waits as long as they
    /// take.
    pub async fn stop(&self) {
        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            warn!("Scheduler is not running");
            return;
        };
        let _ = dispatcher.shutdown_tx.send(true);
        if let Err(e) = dispatcher.handle.await {
            error!(error = %e, "Dispatch loop ended abnormally");
        }
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .await
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }
}

async fn dispatch_loop(
    jobs: JobTable,
    workers: Arc<Semaphore>,
    tick: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // sender dropped counts as a stop request too
            _ = shutdown_rx.changed() => break,
        }

        for due in take_due(&jobs, Instant::now()).await {
            let workers = workers.clone();
            debug!(task = %due.name, "Submitting task");
            in_flight.spawn(async move {
                let DueJob { name, task, guard } = due;
                // the semaphore is never closed
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                info!(task = %name, "Starting task");
                task.run().await;
                drop(guard);
            });
        }

        while let Some(result) = in_flight.try_join_next() {
            log_join(result);
        }
    }

    if !in_flight.is_empty() {
        info!(pending = in_flight.len(), "Waiting for in-flight tasks to finish");
    }
    while let Some(result) = in_flight.join_next().await {
        log_join(result);
    }
}

/// Collect the jobs due at `now` and advance their schedules.
async fn take_due(jobs: &Mutex<HashMap<String, ScheduledJob>>, now: Instant) -> Vec<DueJob> {
    let mut jobs = jobs.lock().await;
    let mut due = Vec::new();

    for (name, job) in jobs.iter_mut() {
        if job.next_due > now {
            continue;
        }
        let period = job.interval.as_duration();
        job.next_due += period;
        if job.next_due <= now {
            // more than a whole interval behind: missed firings are not replayed
            debug!(task = %name, "Task fell behind schedule, resyncing");
            job.next_due = now + period;
        }

        if job.in_flight.swap(true, Ordering::AcqRel) {
            warn!(task = %name, "Previous run still in flight, skipping this firing");
            continue;
        }
        due.push(DueJob {
            name: name.clone(),
            task: job.task.clone(),
            guard: InFlightGuard {
                name: name.clone(),
                flag: job.in_flight.clone(),
            },
        });
    }

    due
}

fn log_join(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if !e.is_panic() {
            error!(error = %e, "Task did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_fn;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: Arc<AtomicUsize>) -> impl Task {
        task_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn fires_three_times_in_three_and_a_half_seconds() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        sched.add_task("count", "1s", counter_task(count.clone())).await.unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        sched.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn add_task_does_not_run_immediately() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        sched.add_task("count", "1m", counter_task(count.clone())).await.unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sched.stop().await;
    }

    #[tokio::test]
    async fn malformed_interval_registers_nothing() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let err = sched
            .add_task("bad", "10x", counter_task(count))
            .await
            .unwrap_err();
        assert!(matches!(err, common::Error::InvalidInterval(_)));
        assert!(sched.get_tasks().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn re_adding_replaces_the_schedule() {
        let sched = scheduler();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        sched.add_task("job", "1s", counter_task(old.clone())).await.unwrap();
        sched.add_task("job", "1s", counter_task(new.clone())).await.unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        sched.stop().await;

        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 5);
        assert_eq!(sched.get_tasks().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_task_stops_firing() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        sched.add_task("job", "1s", counter_task(count.clone())).await.unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        sched.remove_task("job").await;
        sched.remove_task("never-added").await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        sched.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(sched.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn get_tasks_reports_interval_and_args() {
        let sched = scheduler();
        let task = task_fn(|| async {})
            .with_arg("symbol", "BTCUSDT")
            .with_arg("interval", "1h");
        sched.add_task("macd_BTCUSDT_1h", "5m", task).await.unwrap();

        let tasks = sched.get_tasks().await;
        let info = &tasks["macd_BTCUSDT_1h"];
        assert_eq!(info.interval.to_string(), "5m");
        assert_eq!(info.args["symbol"], "BTCUSDT");
        assert_eq!(info.args["interval"], "1h");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_running_jobs() {
        let sched = scheduler();
        let done = Arc::new(AtomicBool::new(false));
        let marker = done.clone();
        sched
            .add_task(
                "slow",
                "1s",
                task_fn(move || {
                    let marker = marker.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        marker.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!done.load(Ordering::SeqCst));
        sched.stop().await;

        assert!(done.load(Ordering::SeqCst), "stop() returned before the slow job finished");
        assert!(!sched.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_firing_is_skipped() {
        let sched = scheduler();
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        sched
            .add_task(
                "slow",
                "1s",
                task_fn(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2_500)).await;
                    }
                }),
            )
            .await
            .unwrap();

        sched.run().await;
        // fires at 1s (runs until 3.5s), skips 2s and 3s, fires again at 4s
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        sched.stop().await;

        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_stop_dispatch() {
        let sched = scheduler();
        let panics = Arc::new(AtomicUsize::new(0));
        let counter = panics.clone();
        sched
            .add_task(
                "boom",
                "1s",
                task_fn(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        panic!("job failed");
                    }
                }),
            )
            .await
            .unwrap();
        let healthy = Arc::new(AtomicUsize::new(0));
        sched.add_task("ok", "1s", counter_task(healthy.clone())).await.unwrap();

        sched.run().await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        sched.stop().await;

        assert_eq!(panics.load(Ordering::SeqCst), 3);
        assert_eq!(healthy.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let sched = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        sched.add_task("count", "1s", counter_task(count.clone())).await.unwrap();

        sched.run().await;
        sched.run().await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        sched.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let sched = TaskScheduler::new(SchedulerConfig {
            max_workers: 2,
            tick: Duration::from_secs(1),
        });
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let (active, peak, finished) = (active.clone(), peak.clone(), finished.clone());
            sched
                .add_task(
                    format!("job{i}"),
                    "1m",
                    task_fn(move || {
                        let (active, peak, finished) = (active.clone(), peak.clone(), finished.clone());
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            finished.fetch_add(1, Ordering::SeqCst);
                        }
                    }),
                )
                .await
                .unwrap();
        }

        sched.run().await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        sched.stop().await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stop_without_run_is_a_no_op() {
        let sched = scheduler();
        sched.stop().await;
        assert!(!sched.is_running().await);
    }
}
