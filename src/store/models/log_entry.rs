//! LogEntry entity: one captured output line owned by a Run.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::schema::logs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            "system" => Ok(LogStream::System),
            other => Err(format!("invalid log stream: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i32,
    pub run_id: String,
    pub ts: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub run_id: String,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct LogRow {
    pub id: i32,
    pub run_id: String,
    pub ts: String,
    pub stream: String,
    pub content: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = logs)]
pub(crate) struct NewLogRow {
    pub run_id: String,
    pub ts: String,
    pub stream: String,
    pub content: String,
}

impl NewLogRow {
    pub(crate) fn from_new(new: &NewLogEntry, now: DateTime<Utc>) -> Self {
        Self {
            run_id: new.run_id.clone(),
            ts: now.to_rfc3339(),
            stream: new.stream.as_str().to_string(),
            content: new.content.clone(),
        }
    }
}

impl LogRow {
    pub(crate) fn into_entry(self) -> Result<LogEntry, String> {
        Ok(LogEntry {
            id: self.id,
            run_id: self.run_id,
            ts: DateTime::parse_from_rfc3339(&self.ts)
                .map_err(|e| format!("corrupt ts: {e}"))?
                .with_timezone(&Utc),
            stream: LogStream::parse(&self.stream)?,
            content: self.content,
        })
    }
}
