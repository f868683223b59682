//! Subprocess executor: spawns `sh -c <script>`, enforces the job timeout,
//! streams output to the Store and Log Hub, and finalizes the Run.
//!
//! Process management uses `tokio::process::Command` with piped stdio. On
//! timeout the child is sent SIGTERM and given a bounded grace period to
//! exit before `child.kill()` (SIGKILL) forces it down, per §5's
//! cancellation model ("SIGTERM followed by forced termination as the
//! platform allows").

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use uuid::Uuid;

use crate::error::Result;
use crate::log_hub::{LogEvent, LogHub};
use crate::queue::QueueHandler;
use crate::store::{Job, LogStream, NewLogEntry, NewMetricSample, NewRun, Run, RunStatus, Store, TriggerType};

/// Defensive re-check of the validator's script-size ceiling (§4.7); the
/// Store is trusted but not infallible between validation and execution.
const MAX_SCRIPT_LEN: usize = 1_048_576;

/// Size of each read from a child's stdout/stderr pipe (§4.4 step 4).
const READ_CHUNK_BYTES: usize = 4096;

/// Cadence of the optional resource-usage sampler.
const METRIC_SAMPLE_INTERVAL_SECS: u64 = 2;

/// How long a timed-out child gets to exit after SIGTERM before SIGKILL
/// forces it down (§5: "SIGTERM followed by forced termination as the
/// platform allows").
const TERMINATION_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct Executor {
    store: Arc<Store>,
    hub: LogHub,
}

impl Executor {
    pub fn new(store: Arc<Store>, hub: LogHub) -> Arc<Self> {
        Arc::new(Self { store, hub })
    }

    async fn execute(&self, job: Job, mut run: Run) {
        if job.script.is_empty() {
            self.fail_precheck(&mut run, "Job script is empty").await;
            return;
        }
        if job.script.len() > MAX_SCRIPT_LEN {
            self.fail_precheck(
                &mut run,
                format!("Job script exceeds maximum of {MAX_SCRIPT_LEN} bytes"),
            )
            .await;
            return;
        }

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        if let Err(e) = self.store.update_run(&run) {
            log::warn!("executor: failed to persist running state for run {}: {e}", run.id);
        }
        self.hub
            .broadcast(LogEvent::status(run.id.clone(), RunStatus::Running))
            .await;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&job.script)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.finalize(
                    &mut run,
                    RunStatus::Failure,
                    None,
                    Some(format!("failed to spawn subprocess: {e}")),
                )
                .await;
                return;
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            self.finalize(
                &mut run,
                RunStatus::Failure,
                None,
                Some("failed to acquire child stdout/stderr pipes".to_string()),
            )
            .await;
            return;
        };

        let stdout_ctx = ReaderCtx {
            run_id: run.id.clone(),
            store: self.store.clone(),
            hub: self.hub.clone(),
        };
        let stderr_ctx = stdout_ctx.clone();

        let stdout_task = tokio::spawn(drain_stream(stdout, LogStream::Stdout, stdout_ctx));
        let stderr_task = tokio::spawn(drain_stream(stderr, LogStream::Stderr, stderr_ctx));

        let (metric_stop_tx, metric_stop_rx) = tokio::sync::oneshot::channel();
        if let Some(pid) = child.id() {
            let sampler_ctx = ReaderCtx {
                run_id: run.id.clone(),
                store: self.store.clone(),
                hub: self.hub.clone(),
            };
            tokio::spawn(sample_metrics_periodically(pid, sampler_ctx, metric_stop_rx));
        }

        let timeout_duration = Duration::from_secs(job.timeout_secs.max(1) as u64);
        let outcome = tokio::time::timeout(timeout_duration, child.wait()).await;
        let _ = metric_stop_tx.send(());

        match outcome {
            Ok(Ok(status)) => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                if status.success() {
                    self.finalize(&mut run, RunStatus::Success, Some(0), None).await;
                } else {
                    let code = status.code().unwrap_or(-1);
                    self.finalize(
                        &mut run,
                        RunStatus::Failure,
                        Some(code),
                        Some(format!("process exited with code {code}")),
                    )
                    .await;
                }
            }
            Ok(Err(e)) => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                self.finalize(
                    &mut run,
                    RunStatus::Failure,
                    None,
                    Some(format!("failed to wait for child: {e}")),
                )
                .await;
            }
            Err(_elapsed) => {
                terminate_gracefully(&mut child, TERMINATION_GRACE_PERIOD).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                self.finalize(
                    &mut run,
                    RunStatus::Timeout,
                    Some(124),
                    Some(format!("Job exceeded timeout of {} seconds", job.timeout_secs)),
                )
                .await;
            }
        }
    }

    async fn fail_precheck(&self, run: &mut Run, message: impl Into<String>) {
        run.status = RunStatus::Failure;
        run.error = Some(message.into());
        if let Err(e) = self.store.update_run(run) {
            log::warn!("executor: failed to persist precheck failure for run {}: {e}", run.id);
        }
    }

    async fn finalize(
        &self,
        run: &mut Run,
        status: RunStatus,
        exit_code: Option<i32>,
        error: Option<String>,
    ) {
        let now = Utc::now();
        run.status = status;
        run.exit_code = exit_code;
        run.error = error;
        run.finished_at = Some(now);
        if let Some(started_at) = run.started_at {
            run.duration_ms = Some((now - started_at).num_milliseconds());
        }

        if let Err(e) = self.store.update_run(run) {
            log::warn!("executor: failed to persist final state for run {}: {e}", run.id);
        }

        let system_line = format!("Job {} with status: {}", run.id, status.as_str());
        if let Err(e) = self.store.add_log(NewLogEntry {
            run_id: run.id.clone(),
            stream: LogStream::System,
            content: system_line.clone(),
        }) {
            log::warn!("executor: failed to persist system log line for run {}: {e}", run.id);
        }
        self.hub
            .broadcast(LogEvent::log(run.id.clone(), LogStream::System, system_line))
            .await;
        self.hub.broadcast(LogEvent::status(run.id.clone(), status)).await;
    }
}

#[async_trait]
impl QueueHandler for Executor {
    async fn handle(&self, job: Job, run: Option<Run>) -> Result<()> {
        let run = match run {
            Some(run) => run,
            None => self.store.create_run(NewRun {
                id: Uuid::new_v4().to_string(),
                job_id: job.id.clone(),
                trigger_type: TriggerType::Scheduled,
            })?,
        };
        self.execute(job, run).await;
        Ok(())
    }
}

/// Sends SIGTERM to `child` (Unix only; grounded on
/// `mofa-cli/src/utils/process_manager.rs::stop_agent_by_pid`'s
/// `nix::sys::signal::kill` pattern) and gives it `grace` to exit before
/// falling back to `child.kill()` (SIGKILL). On non-Unix platforms there is
/// no graceful-termination signal to send, so this goes straight to
/// `child.kill()`.
async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::warn!("executor: failed to send SIGTERM to pid {pid}: {e}");
            }
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[derive(Clone)]
struct ReaderCtx {
    run_id: String,
    store: Arc<Store>,
    hub: LogHub,
}

impl ReaderCtx {
    async fn emit_line(&self, stream: LogStream, content: String) {
        if let Err(e) = self.store.add_log(NewLogEntry {
            run_id: self.run_id.clone(),
            stream,
            content: content.clone(),
        }) {
            log::warn!("executor: failed to persist log line for run {}: {e}", self.run_id);
        }
        self.hub
            .broadcast(LogEvent::log(self.run_id.clone(), stream, content))
            .await;
    }
}

/// Reads `reader` in fixed 4 KiB chunks, splits on `\n`, and emits each
/// non-empty line as a LogEntry plus a Log Hub event (§4.4 step 4).
async fn drain_stream<R: tokio::io::AsyncRead + Unpin>(mut reader: R, stream: LogStream, ctx: ReaderCtx) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("executor: read error on {stream:?} for run {}: {e}", ctx.run_id);
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if !line.is_empty() {
                ctx.emit_line(stream, String::from_utf8_lossy(line).into_owned()).await;
            }
        }
    }

    if !pending.is_empty() {
        ctx.emit_line(stream, String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

/// Best-effort periodic sampler of a running child's CPU/memory usage via
/// `/proc`. A no-op stub on non-Linux targets — sampling is optional (§3);
/// its absence never fails a run.
#[cfg(target_os = "linux")]
async fn sample_metrics_periodically(
    pid: u32,
    ctx: ReaderCtx,
    mut stop_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(METRIC_SAMPLE_INTERVAL_SECS));
    let mut prev: Option<(u64, std::time::Instant)> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match proc_metrics::read_sample(pid, &mut prev) {
                    Some((cpu_pct, rss_bytes, mem_pct)) => {
                        if let Err(e) = ctx.store.record_metric_sample(NewMetricSample {
                            run_id: ctx.run_id.clone(),
                            cpu_pct,
                            rss_bytes,
                            mem_pct,
                        }) {
                            log::warn!("executor: failed to persist metric sample for run {}: {e}", ctx.run_id);
                        }
                        ctx.hub.broadcast(LogEvent::metric(ctx.run_id.clone(), cpu_pct, rss_bytes, mem_pct)).await;
                    }
                    None => break,
                }
            }
            _ = &mut stop_rx => break,
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn sample_metrics_periodically(
    _pid: u32,
    _ctx: ReaderCtx,
    _stop_rx: tokio::sync::oneshot::Receiver<()>,
) {
}

#[cfg(target_os = "linux")]
mod proc_metrics {
    use std::time::Instant;

    /// Typical Linux `USER_HZ`; sufficient for a best-effort estimate since
    /// an exact `sysconf(_SC_CLK_TCK)` call would require an extra FFI
    /// dependency for a Non-goal-adjacent feature.
    const ASSUMED_CLK_TCK: f64 = 100.0;

    pub(super) fn read_sample(pid: u32, prev: &mut Option<(u64, Instant)>) -> Option<(f32, i64, f32)> {
        let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        let rss_kb = status.lines().find_map(|line| {
            line.strip_prefix("VmRSS:")
                .and_then(|rest| rest.trim().split_whitespace().next())
                .and_then(|n| n.parse::<i64>().ok())
        })?;
        let rss_bytes = rss_kb * 1024;

        let mem_total_kb = std::fs::read_to_string("/proc/meminfo").ok().and_then(|meminfo| {
            meminfo.lines().find_map(|line| {
                line.strip_prefix("MemTotal:")
                    .and_then(|rest| rest.trim().split_whitespace().next())
                    .and_then(|n| n.parse::<f64>().ok())
            })
        });
        let mem_pct = mem_total_kb
            .filter(|&total| total > 0.0)
            .map(|total| (rss_kb as f64 / total * 100.0) as f32)
            .unwrap_or(0.0);

        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let fields: Vec<&str> = stat.rsplit(')').next()?.split_whitespace().collect();
        // After the `(comm)` field, utime is field 14 and stime field 15
        // (1-indexed from the start of the whole stat line); relative to
        // the remainder after `)` that's indices 11 and 12.
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let total_ticks = utime + stime;

        let now = Instant::now();
        let cpu_pct = match prev {
            Some((prev_ticks, prev_time)) => {
                let tick_delta = total_ticks.saturating_sub(*prev_ticks) as f64;
                let elapsed = now.duration_since(*prev_time).as_secs_f64().max(0.001);
                ((tick_delta / ASSUMED_CLK_TCK) / elapsed * 100.0) as f32
            }
            None => 0.0,
        };
        *prev = Some((total_ticks, now));

        Some((cpu_pct, rss_bytes, mem_pct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_hub::LogHub;
    use crate::store::{NotifyOn, Store};

    fn sample_job(script: &str, timeout_secs: i32) -> Job {
        Job {
            id: "j1".into(),
            name: "test".into(),
            description: None,
            script: script.into(),
            working_dir: "/tmp".into(),
            timeout_secs,
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

    fn make_executor() -> (Arc<Executor>, Arc<Store>) {
        let store = Store::new_in_memory();
        let hub = LogHub::start();
        (Executor::new(store.clone(), hub), store)
    }

    #[tokio::test]
    async fn successful_script_produces_success_run_and_stdout_log() {
        let (executor, store) = make_executor();
        store
            .create_job(crate::store::NewJob {
                id: "j1".into(),
                name: "hello".into(),
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
            })
            .expect("create job");

        executor
            .handle(sample_job("echo hi", 10), None)
            .await
            .expect("handle");

        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.exit_code, Some(0));
        assert!(run.duration_ms.unwrap_or(-1) >= 0);

        let logs = store.list_logs_for_run(&run.id).expect("list logs");
        assert!(logs.iter().any(|l| l.stream == LogStream::Stdout && l.content == "hi"));
        assert!(logs.iter().any(|l| l.stream == LogStream::System));
    }

    #[tokio::test]
    async fn nonzero_exit_produces_failure_run() {
        let (executor, store) = make_executor();
        store
            .create_job(crate::store::NewJob {
                id: "j1".into(),
                name: "fails".into(),
                description: None,
                script: "exit 7".into(),
                working_dir: "/tmp".into(),
                timeout_secs: 10,
                retry_count: 0,
                retry_delay_secs: 0,
                enabled: true,
                notify_on: NotifyOn::Failure,
                notify_recipients: vec![],
                timezone: "UTC".into(),
                created_by: None,
            })
            .expect("create job");

        executor
            .handle(sample_job("exit 7", 10), None)
            .await
            .expect("handle");

        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(run.exit_code, Some(7));
    }

    #[tokio::test]
    async fn timeout_kills_the_child_and_records_timeout_status() {
        let (executor, store) = make_executor();
        store
            .create_job(crate::store::NewJob {
                id: "j1".into(),
                name: "slow".into(),
                description: None,
                script: "sleep 10".into(),
                working_dir: "/tmp".into(),
                timeout_secs: 1,
                retry_count: 0,
                retry_delay_secs: 0,
                enabled: true,
                notify_on: NotifyOn::Failure,
                notify_recipients: vec![],
                timezone: "UTC".into(),
                created_by: None,
            })
            .expect("create job");

        executor
            .handle(sample_job("sleep 10", 1), None)
            .await
            .expect("handle");

        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Timeout);
        assert_eq!(run.exit_code, Some(124));
        assert!(run.error.as_deref().unwrap_or("").contains("timeout of 1 seconds"));
    }

    #[tokio::test]
    async fn empty_script_fails_precheck_without_spawning() {
        let (executor, store) = make_executor();
        store
            .create_job(crate::store::NewJob {
                id: "j1".into(),
                name: "empty".into(),
                description: None,
                script: "x".into(),
                working_dir: "/tmp".into(),
                timeout_secs: 10,
                retry_count: 0,
                retry_delay_secs: 0,
                enabled: true,
                notify_on: NotifyOn::Failure,
                notify_recipients: vec![],
                timezone: "UTC".into(),
                created_by: None,
            })
            .expect("create job");

        let mut job = sample_job("", 10);
        job.script = String::new();
        executor.handle(job, None).await.expect("handle");

        let runs = store.list_runs_for_job("j1", 10).expect("list runs");
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(run.error.as_deref(), Some("Job script is empty"));
        assert!(run.started_at.is_none());
    }
}
