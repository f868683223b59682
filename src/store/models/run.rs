//! Run entity: one execution attempt of a Job.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::schema::runs;

/// A Run's status. Transitions are monotone along
/// `Pending -> Running -> {Success, Failure, Timeout, Cancelled}` — no
/// back-edges (invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Timeout | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Timeout => "timeout",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "timeout" => Ok(RunStatus::Timeout),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("invalid trigger type: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub trigger_type: TriggerType,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// A fresh Run in `Pending`, as created at enqueue (manual) or dequeue
    /// (scheduled) time.
    pub fn new_pending(id: String, job_id: String, trigger_type: TriggerType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_id,
            status: RunStatus::Pending,
            exit_code: None,
            trigger_type,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: String,
    pub job_id: String,
    pub trigger_type: TriggerType,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct RunRow {
    pub id: String,
    pub job_id: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub trigger_type: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: String,
}

impl RunRow {
    pub(crate) fn from_run(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            job_id: run.job_id.clone(),
            status: run.status.as_str().to_string(),
            exit_code: run.exit_code,
            trigger_type: run.trigger_type.as_str().to_string(),
            started_at: run.started_at.map(|t| t.to_rfc3339()),
            finished_at: run.finished_at.map(|t| t.to_rfc3339()),
            duration_ms: run.duration_ms,
            error: run.error.clone(),
            created_at: run.created_at.to_rfc3339(),
        }
    }

    pub(crate) fn into_run(self) -> Result<Run, String> {
        let parse_ts = |s: &str| -> Result<DateTime<Utc>, String> {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("corrupt timestamp '{s}': {e}"))
        };
        Ok(Run {
            id: self.id,
            job_id: self.job_id,
            status: RunStatus::parse(&self.status)?,
            exit_code: self.exit_code,
            trigger_type: TriggerType::parse(&self.trigger_type)?,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_ts).transpose()?,
            duration_ms: self.duration_ms,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_row_round_trips() {
        let run = Run::new_pending("r1".into(), "j1".into(), TriggerType::Manual, Utc::now());
        let row = RunRow::from_run(&run);
        let back = row.into_run().expect("round trip");
        assert_eq!(back.id, run.id);
        assert_eq!(back.status, RunStatus::Pending);
        assert_eq!(back.trigger_type, TriggerType::Manual);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failure.is_terminal());
        assert!(RunStatus::Timeout.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
