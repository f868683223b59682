//! Durable CRUD for jobs, schedules, runs, log lines and metric samples.
//!
//! Every fallible DB operation here surfaces as
//! [`crate::error::TaskflowError::StorageTransient`]; callers in background
//! loops (scheduler, retention) log it and move on rather than propagate a
//! panic (§5/§7 of the design).

pub mod models;
pub mod pool;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskflowError};

use models::job::{JobRow, JobRowChangeset};
use models::log_entry::{LogRow, NewLogRow};
use models::metric_sample::{MetricRow, NewMetricRow};
use models::run::RunRow;
use models::schedule::ScheduleRow;
pub use models::{
    IntSet, Job, LogEntry, LogStream, MetricSample, NewJob, NewLogEntry, NewMetricSample, NewRun,
    NotifyOn, Run, RunStatus, Schedule, TriggerType, UpdateJob,
};

pub use pool::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardStats {
    pub total_jobs: i64,
    pub enabled_jobs: i64,
    pub runs_total: i64,
    pub runs_success: i64,
    pub runs_failure: i64,
    pub runs_running: i64,
}

/// Handle onto the SQLite-backed store. Cheaply clonable — wraps a pooled
/// connection manager.
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    pub fn init(path: &Path, max_connections: u32) -> Result<Arc<Self>> {
        let pool = pool::init(path, max_connections).map_err(TaskflowError::StorageTransient)?;
        Ok(Arc::new(Self { pool }))
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Arc<Self> {
        Arc::new(Self {
            pool: pool::init_in_memory(),
        })
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::SqliteConnection>>>
    {
        self.pool.get().map_err(TaskflowError::from)
    }

    // ── Jobs ──────────────────────────────────────────────────────────────

    pub fn create_job(&self, new: NewJob) -> Result<Job> {
        use schema::jobs::dsl::*;
        let row = JobRow::from_new(&new, Utc::now());
        let mut conn = self.conn()?;
        diesel::insert_into(jobs)
            .values(&row)
            .execute(&mut conn)?;
        row.into_job().map_err(TaskflowError::StorageTransient)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        use schema::jobs::dsl::*;
        let mut conn = self.conn()?;
        let row: Option<JobRow> = jobs
            .filter(id.eq(job_id))
            .select(JobRow::as_select())
            .first(&mut conn)
            .optional()?;
        row.map(|r| r.into_job().map_err(TaskflowError::StorageTransient))
            .transpose()
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        use schema::jobs::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<JobRow> = jobs
            .order(name.asc())
            .select(JobRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_job().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    pub fn list_enabled_jobs(&self) -> Result<Vec<Job>> {
        use schema::jobs::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<JobRow> = jobs
            .filter(enabled.eq(1))
            .select(JobRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_job().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    pub fn update_job(&self, job_id: &str, update: UpdateJob) -> Result<Job> {
        use schema::jobs::dsl::*;
        let changeset: JobRowChangeset = update.into_changeset(Utc::now());
        let mut conn = self.conn()?;
        diesel::update(jobs.filter(id.eq(job_id)))
            .set(&changeset)
            .execute(&mut conn)?;
        self.get_job(job_id)?
            .ok_or_else(|| TaskflowError::NotFound(format!("job '{job_id}'")))
    }

    /// Deletes the job; `ON DELETE CASCADE` (with `PRAGMA foreign_keys = ON`
    /// set on every pooled connection) removes its schedule, runs, and each
    /// run's logs and metric samples (invariant 5).
    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        use schema::jobs::dsl::*;
        let mut conn = self.conn()?;
        let affected = diesel::delete(jobs.filter(id.eq(job_id))).execute(&mut conn)?;
        Ok(affected > 0)
    }

    // ── Schedules ─────────────────────────────────────────────────────────

    /// Absence of a Schedule row is equivalent to "all fields empty".
    pub fn get_schedule(&self, job_id: &str) -> Result<Schedule> {
        use schema::schedules::dsl::*;
        let mut conn = self.conn()?;
        let row: Option<ScheduleRow> = schedules
            .filter(schema::schedules::job_id.eq(job_id))
            .select(ScheduleRow::as_select())
            .first(&mut conn)
            .optional()?;
        match row {
            Some(r) => r.into_schedule().map_err(TaskflowError::StorageTransient),
            None => Ok(Schedule::match_any()),
        }
    }

    pub fn upsert_schedule(&self, job_id: &str, schedule: &Schedule) -> Result<()> {
        let row = ScheduleRow::from_schedule(job_id, schedule).map_err(TaskflowError::Validation)?;
        let mut conn = self.conn()?;
        diesel::replace_into(schema::schedules::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────────

    pub fn create_run(&self, new: NewRun) -> Result<Run> {
        let run = Run::new_pending(new.id, new.job_id, new.trigger_type, Utc::now());
        self.insert_run(&run)?;
        Ok(run)
    }

    pub(crate) fn insert_run(&self, run: &Run) -> Result<()> {
        let row = RunRow::from_run(run);
        let mut conn = self.conn()?;
        diesel::insert_into(schema::runs::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        use schema::runs::dsl::*;
        let mut conn = self.conn()?;
        let row: Option<RunRow> = runs
            .filter(id.eq(run_id))
            .select(RunRow::as_select())
            .first(&mut conn)
            .optional()?;
        row.map(|r| r.into_run().map_err(TaskflowError::StorageTransient))
            .transpose()
    }

    /// Persist the full state of `run` (status, timestamps, exit code,
    /// error). Used by the Executor at every transition.
    pub fn update_run(&self, run: &Run) -> Result<()> {
        use schema::runs::dsl::*;
        let row = RunRow::from_run(run);
        let mut conn = self.conn()?;
        diesel::update(runs.filter(id.eq(&run.id)))
            .set(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Most recent Run for a Job ordered by creation, used by the scheduler's
    /// duplicate-suppression check (§4.2 step 2c).
    pub fn most_recent_run_for_job(&self, job_id: &str) -> Result<Option<Run>> {
        use schema::runs::dsl::*;
        let mut conn = self.conn()?;
        let row: Option<RunRow> = runs
            .filter(schema::runs::job_id.eq(job_id))
            .order(created_at.desc())
            .select(RunRow::as_select())
            .first(&mut conn)
            .optional()?;
        row.map(|r| r.into_run().map_err(TaskflowError::StorageTransient))
            .transpose()
    }

    pub fn list_runs_for_job(&self, job_id: &str, limit: i64) -> Result<Vec<Run>> {
        use schema::runs::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<RunRow> = runs
            .filter(schema::runs::job_id.eq(job_id))
            .order(created_at.desc())
            .limit(limit)
            .select(RunRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_run().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    pub fn list_runs(&self, limit: i64) -> Result<Vec<Run>> {
        use schema::runs::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<RunRow> = runs
            .order(created_at.desc())
            .limit(limit)
            .select(RunRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_run().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    /// Delete Runs with `started_at < cutoff`, cascading LogEntries and
    /// MetricSamples (invariant 6). Runs that never started (`started_at`
    /// `NULL`) are never pruned by age.
    pub fn delete_runs_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        use schema::runs::dsl::*;
        let cutoff_str = cutoff.to_rfc3339();
        let mut conn = self.conn()?;
        let affected = diesel::delete(
            runs.filter(started_at.is_not_null())
                .filter(started_at.lt(cutoff_str)),
        )
        .execute(&mut conn)?;
        Ok(affected)
    }

    // ── Logs ──────────────────────────────────────────────────────────────

    pub fn add_log(&self, new: NewLogEntry) -> Result<LogEntry> {
        let row = NewLogRow::from_new(&new, Utc::now());
        let mut conn = self.conn()?;
        diesel::insert_into(schema::logs::table)
            .values(&row)
            .execute(&mut conn)?;
        let inserted: LogRow = schema::logs::table
            .order(schema::logs::id.desc())
            .select(LogRow::as_select())
            .first(&mut conn)?;
        inserted.into_entry().map_err(TaskflowError::StorageTransient)
    }

    pub fn list_logs_for_run(&self, run_id_val: &str) -> Result<Vec<LogEntry>> {
        use schema::logs::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<LogRow> = logs
            .filter(run_id.eq(run_id_val))
            .order(id.asc())
            .select(LogRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_entry().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    // ── Metrics ───────────────────────────────────────────────────────────

    pub fn record_metric_sample(&self, new: NewMetricSample) -> Result<MetricSample> {
        let row = NewMetricRow::from_new(&new, Utc::now());
        let mut conn = self.conn()?;
        diesel::insert_into(schema::metrics::table)
            .values(&row)
            .execute(&mut conn)?;
        let inserted: MetricRow = schema::metrics::table
            .order(schema::metrics::id.desc())
            .select(MetricRow::as_select())
            .first(&mut conn)?;
        inserted.into_sample().map_err(TaskflowError::StorageTransient)
    }

    pub fn list_metrics_for_run(&self, run_id_val: &str) -> Result<Vec<MetricSample>> {
        use schema::metrics::dsl::*;
        let mut conn = self.conn()?;
        let rows: Vec<MetricRow> = metrics
            .filter(run_id.eq(run_id_val))
            .order(id.asc())
            .select(MetricRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|r| r.into_sample().map_err(TaskflowError::StorageTransient))
            .collect()
    }

    // ── Dashboard ─────────────────────────────────────────────────────────

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        use diesel::dsl::count_star;
        let mut conn = self.conn()?;

        let total_jobs: i64 = schema::jobs::table.select(count_star()).first(&mut conn)?;
        let enabled_jobs: i64 = schema::jobs::table
            .filter(schema::jobs::enabled.eq(1))
            .select(count_star())
            .first(&mut conn)?;
        let runs_total: i64 = schema::runs::table.select(count_star()).first(&mut conn)?;
        let runs_success: i64 = schema::runs::table
            .filter(schema::runs::status.eq("success"))
            .select(count_star())
            .first(&mut conn)?;
        let runs_failure: i64 = schema::runs::table
            .filter(schema::runs::status.eq_any(["failure", "timeout"]))
            .select(count_star())
            .first(&mut conn)?;
        let runs_running: i64 = schema::runs::table
            .filter(schema::runs::status.eq_any(["pending", "running"]))
            .select(count_star())
            .first(&mut conn)?;

        Ok(DashboardStats {
            total_jobs,
            enabled_jobs,
            runs_total,
            runs_success,
            runs_failure,
            runs_running,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::job::NotifyOn;

    fn sample_job(id: &str) -> NewJob {
        NewJob {
            id: id.to_string(),
            name: "hello".to_string(),
            description: None,
            script: "echo hi".to_string(),
            working_dir: "/tmp".to_string(),
            timeout_secs: 10,
            retry_count: 0,
            retry_delay_secs: 0,
            enabled: true,
            notify_on: NotifyOn::Failure,
            notify_recipients: vec![],
            timezone: "UTC".to_string(),
            created_by: None,
        }
    }

    #[test]
    fn create_and_get_job_round_trips() {
        let store = Store::new_in_memory();
        let created = store.create_job(sample_job("j1")).expect("create");
        let fetched = store.get_job("j1").expect("get").expect("present");
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.script, "echo hi");
        assert!(fetched.enabled);
    }

    #[test]
    fn get_missing_job_returns_none() {
        let store = Store::new_in_memory();
        assert!(store.get_job("nope").expect("get").is_none());
    }

    #[test]
    fn update_job_changes_only_given_fields() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create");
        let updated = store
            .update_job(
                "j1",
                UpdateJob {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .expect("update");
        assert!(!updated.enabled);
        assert_eq!(updated.script, "echo hi");
    }

    #[test]
    fn schedule_absent_is_match_any() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create");
        let schedule = store.get_schedule("j1").expect("get schedule");
        assert_eq!(schedule, Schedule::match_any());
    }

    #[test]
    fn schedule_round_trips_through_upsert() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create");
        let schedule = Schedule {
            hours: IntSet(vec![23]),
            minutes: IntSet(vec![59]),
            ..Schedule::match_any()
        };
        store.upsert_schedule("j1", &schedule).expect("upsert");
        let fetched = store.get_schedule("j1").expect("get");
        assert_eq!(fetched, schedule);
    }

    #[test]
    fn delete_job_cascades_runs_logs_and_metrics() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create job");
        let run = store
            .create_run(NewRun {
                id: "r1".into(),
                job_id: "j1".into(),
                trigger_type: TriggerType::Manual,
            })
            .expect("create run");
        store
            .add_log(NewLogEntry {
                run_id: run.id.clone(),
                stream: LogStream::Stdout,
                content: "hi".into(),
            })
            .expect("add log");
        store
            .record_metric_sample(NewMetricSample {
                run_id: run.id.clone(),
                cpu_pct: 1.0,
                rss_bytes: 1024,
                mem_pct: 0.1,
            })
            .expect("record metric");

        let deleted = store.delete_job("j1").expect("delete");
        assert!(deleted);
        assert!(store.get_run(&run.id).expect("get run").is_none());
        assert!(store.list_logs_for_run(&run.id).expect("logs").is_empty());
        assert!(store
            .list_metrics_for_run(&run.id)
            .expect("metrics")
            .is_empty());
    }

    #[test]
    fn retention_deletes_only_old_runs() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create job");

        let mut old_run = Run::new_pending("old".into(), "j1".into(), TriggerType::Manual, Utc::now());
        old_run.started_at = Some(Utc::now() - chrono::Duration::days(2));
        store.insert_run(&old_run).expect("insert old run");

        let mut recent_run = Run::new_pending("recent".into(), "j1".into(), TriggerType::Manual, Utc::now());
        recent_run.started_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.insert_run(&recent_run).expect("insert recent run");

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let deleted = store.delete_runs_started_before(cutoff).expect("retention");
        assert_eq!(deleted, 1);
        assert!(store.get_run("old").expect("get").is_none());
        assert!(store.get_run("recent").expect("get").is_some());
    }

    #[test]
    fn most_recent_run_for_job_picks_latest() {
        let store = Store::new_in_memory();
        store.create_job(sample_job("j1")).expect("create job");
        store
            .create_run(NewRun {
                id: "r1".into(),
                job_id: "j1".into(),
                trigger_type: TriggerType::Manual,
            })
            .expect("run 1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .create_run(NewRun {
                id: "r2".into(),
                job_id: "j1".into(),
                trigger_type: TriggerType::Manual,
            })
            .expect("run 2");

        let latest = store
            .most_recent_run_for_job("j1")
            .expect("query")
            .expect("present");
        assert_eq!(latest.id, "r2");
    }
}
