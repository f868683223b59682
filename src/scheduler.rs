//! Minute-granular tick loop that matches Job schedules and enqueues
//! eligible jobs.
//!
//! Same idempotent-rejecting Start/Stop shape as the Queue and Retention
//! loop: a `watch`-signalled background task polled by `tokio::select!`.
//! Rather than holding a job map in memory and ticking every second, this
//! one treats the Store as the source of truth and re-reads it once a
//! minute, matching the minute-granularity this component targets.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, TaskflowError};
use crate::matcher;
use crate::queue::Queue;
use crate::store::{Job, NewRun, Run, Store, TriggerType};

/// Scheduler tick cadence (§4.2: "a period tick source fixed at one
/// minute").
const TICK_INTERVAL: StdDuration = StdDuration::from_secs(60);

pub struct Scheduler {
    store: Arc<Store>,
    queue: Arc<Queue>,
    running: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, queue: Arc<Queue>) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx,
            stop_rx,
        })
    }

    /// Launches the tick loop and the Queue's worker bound to `handler`.
    /// Rejects a second call with a conflict error while already running.
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn crate::queue::QueueHandler>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TaskflowError::Conflict(
                "scheduler is already running".to_string(),
            ));
        }

        self.queue.start(handler).await?;

        let store = self.store.clone();
        let queue = self.queue.clone();
        let mut stop_rx = self.stop_rx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    biased;

                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        run_tick(&store, &queue).await;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Signals shutdown; the tick loop exits at the next check and the
    /// Queue's worker exits once its in-flight handler returns.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        self.queue.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bypasses the calendar predicate entirely, for manual triggers. The
    /// caller has already created the Run row.
    pub async fn enqueue(&self, job: Job, run: Run) -> Result<()> {
        self.queue.enqueue_with_run(job, Some(run)).await
    }

    /// Runs one tick synchronously; exposed for tests and for callers that
    /// want to force a scan outside the minute cadence.
    pub async fn run_tick(&self) {
        run_tick(&self.store, &self.queue).await;
    }
}

/// The tick algorithm of §4.2: list enabled jobs, filter by the matcher,
/// suppress duplicates within the same wall-clock minute, enqueue the
/// rest. Store errors are logged and the tick continues with the next job.
async fn run_tick(store: &Arc<Store>, queue: &Arc<Queue>) {
    let now = Utc::now();

    let jobs = match store.list_enabled_jobs() {
        Ok(jobs) => jobs,
        Err(e) => {
            log::warn!("scheduler: failed to list jobs: {e}");
            return;
        }
    };

    for job in jobs {
        let tz = match Tz::from_str(&job.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!(
                    "scheduler: job '{}' has an unrecognized timezone '{}', skipping",
                    job.id,
                    job.timezone
                );
                continue;
            }
        };

        let schedule = match store.get_schedule(&job.id) {
            Ok(schedule) => schedule,
            Err(e) => {
                log::warn!("scheduler: failed to load schedule for job '{}': {e}", job.id);
                continue;
            }
        };

        if !matcher::matches(now, &schedule, tz) {
            continue;
        }

        match store.most_recent_run_for_job(&job.id) {
            Ok(Some(recent)) if same_minute_window(recent.started_at, now) => {
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!(
                    "scheduler: failed to check duplicate suppression for job '{}': {e}",
                    job.id
                );
                continue;
            }
        }

        let run = match store.create_run(NewRun {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            trigger_type: TriggerType::Scheduled,
        }) {
            Ok(run) => run,
            Err(e) => {
                log::warn!("scheduler: failed to create run for job '{}': {e}", job.id);
                continue;
            }
        };

        if let Err(e) = queue.enqueue_with_run(job.clone(), Some(run)).await {
            log::warn!("scheduler: failed to enqueue job '{}': {e}", job.id);
        }
    }
}

/// True if `started_at`, once it exists, falls in the same one-minute
/// window as `now` (both truncated to minute) — §4.2 step 2c.
fn same_minute_window(started_at: Option<chrono::DateTime<Utc>>, now: chrono::DateTime<Utc>) -> bool {
    match started_at {
        Some(t) => matcher::truncate_to_minute(t) == matcher::truncate_to_minute(now),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueHandler;
    use crate::store::{IntSet, NewJob, NotifyOn, Schedule};
    use async_trait::async_trait;
    use chrono::Timelike;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueueHandler for CountingHandler {
        async fn handle(&self, _job: Job, _run: Option<Run>) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn seed_job(store: &Arc<Store>, id: &str, enabled: bool) -> Job {
        store
            .create_job(NewJob {
                id: id.to_string(),
                name: "job".into(),
                description: None,
                script: "echo hi".into(),
                working_dir: "/tmp".into(),
                timeout_secs: 10,
                retry_count: 0,
                retry_delay_secs: 0,
                enabled,
                notify_on: NotifyOn::Failure,
                notify_recipients: vec![],
                timezone: "UTC".into(),
                created_by: None,
            })
            .expect("create job")
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = Store::new_in_memory();
        let queue = Arc::new(Queue::new());
        let scheduler = Scheduler::new(store, queue);
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler { count });
        scheduler.start(handler.clone()).await.expect("first start");
        assert!(scheduler.start(handler).await.is_err());
        scheduler.stop();
    }

    #[tokio::test]
    async fn tick_enqueues_matching_enabled_job() {
        let store = Store::new_in_memory();
        let job = seed_job(&store, "j1", true);
        let now = Utc::now();
        store
            .upsert_schedule(
                &job.id,
                &Schedule {
                    hours: IntSet(vec![now.hour() as i32]),
                    minutes: IntSet(vec![now.minute() as i32]),
                    ..Schedule::match_any()
                },
            )
            .expect("upsert schedule");

        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler {
            count: count.clone(),
        });
        queue.start(handler).await.expect("queue start");

        let scheduler = Scheduler::new(store.clone(), queue);
        scheduler.run_tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger_type, TriggerType::Scheduled);
    }

    #[tokio::test]
    async fn tick_skips_disabled_job() {
        let store = Store::new_in_memory();
        seed_job(&store, "j1", false);

        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler {
            count: count.clone(),
        });
        queue.start(handler).await.expect("queue start");

        let scheduler = Scheduler::new(store.clone(), queue);
        scheduler.run_tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tick_does_not_reenqueue_within_the_same_minute() {
        let store = Store::new_in_memory();
        let job = seed_job(&store, "j1", true);
        let now = Utc::now();
        store
            .upsert_schedule(
                &job.id,
                &Schedule {
                    hours: IntSet(vec![now.hour() as i32]),
                    minutes: IntSet(vec![now.minute() as i32]),
                    ..Schedule::match_any()
                },
            )
            .expect("upsert schedule");

        let mut existing = Run::new_pending(Uuid::new_v4().to_string(), job.id.clone(), TriggerType::Scheduled, now);
        existing.started_at = Some(now);
        store.insert_run(&existing).expect("insert run");

        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler {
            count: count.clone(),
        });
        queue.start(handler).await.expect("queue start");

        let scheduler = Scheduler::new(store.clone(), queue);
        scheduler.run_tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        assert_eq!(runs.len(), 1, "no new run should have been created");
    }

    #[tokio::test]
    async fn tick_skips_job_with_unmatched_schedule() {
        let store = Store::new_in_memory();
        let job = seed_job(&store, "j1", true);
        store
            .upsert_schedule(
                &job.id,
                &Schedule {
                    hours: IntSet(vec![((Utc::now().hour() + 1) % 24) as i32]),
                    ..Schedule::match_any()
                },
            )
            .expect("upsert schedule");

        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler {
            count: count.clone(),
        });
        queue.start(handler).await.expect("queue start");

        let scheduler = Scheduler::new(store.clone(), queue);
        scheduler.run_tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
