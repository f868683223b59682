//! Bounded FIFO queue with a single consumer.
//!
//! A `watch::Sender<bool>` shutdown signal checked by a `tokio::select!`
//! loop, with an `Arc<dyn Trait>` handler so the consumer's behavior stays
//! pluggable independent of what runs a dequeued job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{Result, TaskflowError};
use crate::store::{Job, Run};

/// Queue capacity (§4.3).
pub const QUEUE_CAPACITY: usize = 100;

/// One unit of work: a Job to execute and, for manually-triggered runs, the
/// Run row already created by the caller.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job: Job,
    pub run: Option<Run>,
}

/// The capability wired to the queue's single worker. The Executor is the
/// production implementation; tests and alternative deployments (dry-run,
/// containerized) may supply their own.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, job: Job, run: Option<Run>) -> Result<()>;
}

pub struct Queue {
    tx: mpsc::Sender<WorkItem>,
    rx: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    running: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Queue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx,
            stop_rx,
        }
    }

    /// Appends a Job with no pre-existing Run; the handler creates one.
    /// Blocks the caller if the queue is at capacity.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        self.enqueue_with_run(job, None).await
    }

    /// Appends a Job with a Run already created by the caller (manual
    /// triggers from the gateway).
    pub async fn enqueue_with_run(&self, job: Job, run: Option<Run>) -> Result<()> {
        self.tx
            .send(WorkItem { job, run })
            .await
            .map_err(|_| TaskflowError::Conflict("queue consumer has shut down".to_string()))
    }

    /// Launches the consumer task bound to `handler`. Returns a conflict
    /// error if already running.
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn QueueHandler>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TaskflowError::Conflict("queue is already running".to_string()));
        }

        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| TaskflowError::Conflict("queue receiver already taken".to_string()))?;
        let mut stop_rx = self.stop_rx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    item = rx.recv() => {
                        match item {
                            Some(work) => {
                                if let Err(e) = handler.handle(work.job, work.run).await {
                                    log::warn!("queue: handler returned an error: {e}");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Signals shutdown; the consumer exits at the next loop iteration once
    /// any in-flight handler call returns.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NotifyOn, TriggerType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn sample_job(id: &str) -> Job {
        use chrono::Utc;
        Job {
            id: id.to_string(),
            name: "test".into(),
            description: None,
            script: "echo hi".into(),
            working_dir: "/tmp".into(),
            timeout_secs: 10,
            retry_count: 0,
            retry_delay_secs: 0,
            enabled: true,
            notify_on: NotifyOn::Failure,
            notify_recipients: vec![],
            timezone: "UTC".into(),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

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

    #[tokio::test]
    async fn start_then_start_again_is_rejected() {
        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler { count });
        queue.start(handler.clone()).await.expect("first start");
        assert!(queue.start(handler).await.is_err());
    }

    #[tokio::test]
    async fn enqueued_work_reaches_the_handler() {
        let queue = Arc::new(Queue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler {
            count: count.clone(),
        });
        queue.start(handler).await.expect("start");

        queue.enqueue(sample_job("j1")).await.expect("enqueue");
        queue.enqueue(sample_job("j2")).await.expect("enqueue");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn is_running_reflects_start_stop() {
        let queue = Arc::new(Queue::new());
        assert!(!queue.is_running());
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn QueueHandler> = Arc::new(CountingHandler { count });
        queue.start(handler).await.expect("start");
        assert!(queue.is_running());
        queue.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queue.is_running());
    }
}
