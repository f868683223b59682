//! MetricSample entity: optional point-in-time resource usage for a Run.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::schema::metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: i32,
    pub run_id: String,
    pub ts: DateTime<Utc>,
    pub cpu_pct: f32,
    pub rss_bytes: i64,
    pub mem_pct: f32,
}

#[derive(Debug, Clone)]
pub struct NewMetricSample {
    pub run_id: String,
    pub cpu_pct: f32,
    pub rss_bytes: i64,
    pub mem_pct: f32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = metrics)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct MetricRow {
    pub id: i32,
    pub run_id: String,
    pub ts: String,
    pub cpu_pct: f32,
    pub rss_bytes: i64,
    pub mem_pct: f32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = metrics)]
pub(crate) struct NewMetricRow {
    pub run_id: String,
    pub ts: String,
    pub cpu_pct: f32,
    pub rss_bytes: i64,
    pub mem_pct: f32,
}

impl NewMetricRow {
    pub(crate) fn from_new(new: &NewMetricSample, now: DateTime<Utc>) -> Self {
        Self {
            run_id: new.run_id.clone(),
            ts: now.to_rfc3339(),
            cpu_pct: new.cpu_pct,
            rss_bytes: new.rss_bytes,
            mem_pct: new.mem_pct,
        }
    }
}

impl MetricRow {
    pub(crate) fn into_sample(self) -> Result<MetricSample, String> {
        Ok(MetricSample {
            id: self.id,
            run_id: self.run_id,
            ts: DateTime::parse_from_rfc3339(&self.ts)
                .map_err(|e| format!("corrupt ts: {e}"))?
                .with_timezone(&Utc),
            cpu_pct: self.cpu_pct,
            rss_bytes: self.rss_bytes,
            mem_pct: self.mem_pct,
        })
    }
}
