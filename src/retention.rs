//! Daily periodic pruning of old Runs and their cascaded logs/metrics.
//! Same idempotent-rejecting Start/Stop shape as the Scheduler and Queue: a
//! `watch`-signalled background task polled by `tokio::select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;

use crate::error::{Result, TaskflowError};
use crate::store::Store;

/// Daily cadence (§4.6: "A daily-period task").
const TICK_INTERVAL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

pub struct Retention {
    store: Arc<Store>,
    retention_days: i64,
    running: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Retention {
    pub fn new(store: Arc<Store>, retention_days: i64) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            retention_days,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx,
            stop_rx,
        })
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TaskflowError::Conflict("retention loop is already running".to_string()));
        }

        let store = self.store.clone();
        let retention_days = self.retention_days;
        let mut stop_rx = self.stop_rx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            // The first tick fires immediately; consume it so the loop
            // doesn't prune on startup before the process has settled.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;

                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        run_once(&store, retention_days);
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one pruning pass synchronously; exposed for callers (and
    /// tests) that want to force a cycle outside the daily tick.
    pub fn run_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        self.store.delete_runs_started_before(cutoff)
    }
}

fn run_once(store: &Arc<Store>, retention_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    match store.delete_runs_started_before(cutoff) {
        Ok(deleted) => {
            if deleted > 0 {
                log::info!("retention: pruned {deleted} run(s) older than {retention_days} day(s)");
            }
        }
        Err(e) => log::warn!("retention: pruning pass failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Run, TriggerType};

    fn seed_job(store: &Arc<Store>, id: &str) {
        store
            .create_job(crate::store::NewJob {
                id: id.to_string(),
                name: "job".into(),
                description: None,
                script: "echo hi".into(),
                working_dir: "/tmp".into(),
                timeout_secs: 10,
                retry_count: 0,
                retry_delay_secs: 0,
                enabled: true,
                notify_on: crate::store::NotifyOn::Failure,
                notify_recipients: vec![],
                timezone: "UTC".into(),
                created_by: None,
            })
            .expect("create job");
    }

    #[test]
    fn run_once_deletes_only_runs_older_than_the_bound() {
        let store = Store::new_in_memory();
        seed_job(&store, "j1");

        let mut old_run = Run::new_pending("old".into(), "j1".into(), TriggerType::Manual, Utc::now());
        old_run.started_at = Some(Utc::now() - ChronoDuration::days(2));
        store.insert_run(&old_run).expect("insert old run");

        let mut recent_run = Run::new_pending("recent".into(), "j1".into(), TriggerType::Manual, Utc::now());
        recent_run.started_at = Some(Utc::now() - ChronoDuration::hours(1));
        store.insert_run(&recent_run).expect("insert recent run");

        let retention = Retention::new(store.clone(), 1);
        let deleted = retention.run_once().expect("run_once");
        assert_eq!(deleted, 1);
        assert!(store.get_run("old").expect("get").is_none());
        assert!(store.get_run("recent").expect("get").is_some());
    }

    #[test]
    fn run_once_twice_in_a_row_is_idempotent() {
        let store = Store::new_in_memory();
        seed_job(&store, "j1");
        let mut old_run = Run::new_pending("old".into(), "j1".into(), TriggerType::Manual, Utc::now());
        old_run.started_at = Some(Utc::now() - ChronoDuration::days(5));
        store.insert_run(&old_run).expect("insert old run");

        let retention = Retention::new(store.clone(), 1);
        let first = retention.run_once().expect("first run");
        let second = retention.run_once().expect("second run");
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = Store::new_in_memory();
        let retention = Retention::new(store, 30);
        retention.start().expect("first start");
        assert!(retention.start().is_err());
        retention.stop();
    }
}
