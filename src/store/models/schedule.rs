//! Schedule entity: six ordered-sequence fields over integers, one-to-one
//! with a Job. An empty field means "any"; absence of a row is equivalent to
//! all fields empty (see [`crate::store::Store::get_schedule`]).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::schema::schedules;

/// A set of allowed integer values for one schedule field. Empty means
/// "matches any value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntSet(pub Vec<i32>);

impl IntSet {
    pub fn empty() -> Self {
        IntSet(Vec::new())
    }

    pub fn matches(&self, value: i32) -> bool {
        self.0.is_empty() || self.0.contains(&value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub years: IntSet,
    pub months: IntSet,
    pub days: IntSet,
    pub weekdays: IntSet,
    pub hours: IntSet,
    pub minutes: IntSet,
}

impl Schedule {
    /// A schedule with every field empty — matches any minute.
    pub fn match_any() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct ScheduleRow {
    pub job_id: String,
    pub years_json: String,
    pub months_json: String,
    pub days_json: String,
    pub weekdays_json: String,
    pub hours_json: String,
    pub minutes_json: String,
}

impl ScheduleRow {
    pub(crate) fn from_schedule(job_id: &str, schedule: &Schedule) -> Result<Self, String> {
        let ser = |s: &IntSet| {
            serde_json::to_string(&s.0).map_err(|e| format!("failed to serialize schedule: {e}"))
        };
        Ok(Self {
            job_id: job_id.to_string(),
            years_json: ser(&schedule.years)?,
            months_json: ser(&schedule.months)?,
            days_json: ser(&schedule.days)?,
            weekdays_json: ser(&schedule.weekdays)?,
            hours_json: ser(&schedule.hours)?,
            minutes_json: ser(&schedule.minutes)?,
        })
    }

    pub(crate) fn into_schedule(self) -> Result<Schedule, String> {
        let de = |s: &str| -> Result<IntSet, String> {
            serde_json::from_str(s)
                .map(IntSet)
                .map_err(|e| format!("corrupt schedule field: {e}"))
        };
        Ok(Schedule {
            years: de(&self.years_json)?,
            months: de(&self.months_json)?,
            days: de(&self.days_json)?,
            weekdays: de(&self.weekdays_json)?,
            hours: de(&self.hours_json)?,
            minutes: de(&self.minutes_json)?,
        })
    }
}
