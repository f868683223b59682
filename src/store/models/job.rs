//! Job entity: a stable script definition with execution policy.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::schema::jobs;

use super::{bool_to_int, int_to_bool};

/// Notification trigger policy for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyOn {
    Always,
    Success,
    Failure,
}

impl NotifyOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyOn::Always => "always",
            NotifyOn::Success => "success",
            NotifyOn::Failure => "failure",
        }
    }

    /// Parse a `notify_on` ingress value. Per the validator contract, an
    /// empty string is accepted and normalized to the default, `Failure`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "" | "failure" => Ok(NotifyOn::Failure),
            "always" => Ok(NotifyOn::Always),
            "success" => Ok(NotifyOn::Success),
            other => Err(format!("invalid notify_on value: '{other}'")),
        }
    }
}

impl Default for NotifyOn {
    fn default() -> Self {
        NotifyOn::Failure
    }
}

/// A job as stored and returned by the [`crate::store::Store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub script: String,
    pub working_dir: String,
    pub timeout_secs: i32,
    pub retry_count: i32,
    pub retry_delay_secs: i32,
    pub enabled: bool,
    pub notify_on: NotifyOn,
    pub notify_recipients: Vec<String>,
    pub timezone: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a job, after validation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub script: String,
    pub working_dir: String,
    pub timeout_secs: i32,
    pub retry_count: i32,
    pub retry_delay_secs: i32,
    pub enabled: bool,
    pub notify_on: NotifyOn,
    pub notify_recipients: Vec<String>,
    pub timezone: String,
    pub created_by: Option<String>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateJob {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub script: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_secs: Option<i32>,
    pub retry_count: Option<i32>,
    pub retry_delay_secs: Option<i32>,
    pub enabled: Option<bool>,
    pub notify_on: Option<NotifyOn>,
    pub notify_recipients: Option<Vec<String>>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct JobRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub script: String,
    pub working_dir: String,
    pub timeout_secs: i32,
    pub retry_count: i32,
    pub retry_delay_secs: i32,
    pub enabled: i32,
    pub notify_on: String,
    pub notify_recipients_json: String,
    pub timezone: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = jobs)]
pub(crate) struct JobRowChangeset {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub script: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_secs: Option<i32>,
    pub retry_count: Option<i32>,
    pub retry_delay_secs: Option<i32>,
    pub enabled: Option<i32>,
    pub notify_on: Option<String>,
    pub notify_recipients_json: Option<String>,
    pub timezone: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    pub(crate) fn from_new(new: &NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            script: new.script.clone(),
            working_dir: new.working_dir.clone(),
            timeout_secs: new.timeout_secs,
            retry_count: new.retry_count,
            retry_delay_secs: new.retry_delay_secs,
            enabled: bool_to_int(new.enabled),
            notify_on: new.notify_on.as_str().to_string(),
            notify_recipients_json: serde_json::to_string(&new.notify_recipients)
                .unwrap_or_else(|_| "[]".to_string()),
            timezone: new.timezone.clone(),
            created_by: new.created_by.clone(),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        }
    }

    pub(crate) fn into_job(self) -> Result<Job, String> {
        let notify_on = NotifyOn::parse(&self.notify_on)?;
        let notify_recipients: Vec<String> = serde_json::from_str(&self.notify_recipients_json)
            .map_err(|e| format!("corrupt notify_recipients_json: {e}"))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| format!("corrupt created_at: {e}"))?
            .with_timezone(&Utc);
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| format!("corrupt updated_at: {e}"))?
            .with_timezone(&Utc);
        Ok(Job {
            id: self.id,
            name: self.name,
            description: self.description,
            script: self.script,
            working_dir: self.working_dir,
            timeout_secs: self.timeout_secs,
            retry_count: self.retry_count,
            retry_delay_secs: self.retry_delay_secs,
            enabled: int_to_bool(self.enabled),
            notify_on,
            notify_recipients,
            timezone: self.timezone,
            created_by: self.created_by,
            created_at,
            updated_at,
        })
    }
}

impl UpdateJob {
    pub(crate) fn into_changeset(self, now: DateTime<Utc>) -> JobRowChangeset {
        JobRowChangeset {
            name: self.name,
            description: self.description,
            script: self.script,
            working_dir: self.working_dir,
            timeout_secs: self.timeout_secs,
            retry_count: self.retry_count,
            retry_delay_secs: self.retry_delay_secs,
            enabled: self.enabled.map(bool_to_int),
            notify_on: self.notify_on.map(|n| n.as_str().to_string()),
            notify_recipients_json: self
                .notify_recipients
                .map(|r| serde_json::to_string(&r).unwrap_or_else(|_| "[]".to_string())),
            timezone: self.timezone,
            updated_at: now.to_rfc3339(),
        }
    }
}
