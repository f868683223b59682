//! Ingress validation. Every field constraint that must hold before
//! a [`crate::store::NewJob`] or [`crate::store::Schedule`] reaches the
//! Store lives here, in a dedicated module rather than scattered through
//! the Store layer.

use crate::error::{Result, TaskflowError};
use crate::store::{IntSet, NewJob, Schedule, UpdateJob};

const MAX_NAME_LEN: usize = 255;
const MIN_SCRIPT_LEN: usize = 1;
const MAX_SCRIPT_LEN: usize = 1_048_576;
const MIN_TIMEOUT_SECS: i32 = 1;
const MAX_TIMEOUT_SECS: i32 = 86_400;
const MAX_RETRY_COUNT: i32 = 10;
const MAX_RETRY_DELAY_SECS: i32 = 86_400;

fn fail(msg: impl Into<String>) -> TaskflowError {
    TaskflowError::Validation(msg.into())
}

/// Validate a job at creation. Does not mutate `new`; callers normalize
/// `notify_on` separately via [`crate::store::NotifyOn::parse`], which
/// already folds `""` to `Failure`.
pub fn validate_new_job(new: &NewJob) -> Result<()> {
    validate_name(&new.name)?;
    validate_script(&new.script)?;
    validate_timeout(new.timeout_secs)?;
    validate_retry_count(new.retry_count)?;
    validate_retry_delay(new.retry_delay_secs)?;
    Ok(())
}

/// Validate only the fields an [`UpdateJob`] actually sets.
pub fn validate_update_job(update: &UpdateJob) -> Result<()> {
    if let Some(name) = &update.name {
        validate_name(name)?;
    }
    if let Some(script) = &update.script {
        validate_script(script)?;
    }
    if let Some(timeout_secs) = update.timeout_secs {
        validate_timeout(timeout_secs)?;
    }
    if let Some(retry_count) = update.retry_count {
        validate_retry_count(retry_count)?;
    }
    if let Some(retry_delay_secs) = update.retry_delay_secs {
        validate_retry_delay(retry_delay_secs)?;
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(fail(format!(
            "name must be 1..={MAX_NAME_LEN} chars, got {}",
            name.len()
        )));
    }
    Ok(())
}

fn validate_script(script: &str) -> Result<()> {
    let len = script.len();
    if len < MIN_SCRIPT_LEN || len > MAX_SCRIPT_LEN {
        return Err(fail(format!(
            "script must be {MIN_SCRIPT_LEN}..={MAX_SCRIPT_LEN} bytes, got {len}"
        )));
    }
    Ok(())
}

fn validate_timeout(timeout_secs: i32) -> Result<()> {
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
        return Err(fail(format!(
            "timeout_secs must be {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}, got {timeout_secs}"
        )));
    }
    Ok(())
}

fn validate_retry_count(retry_count: i32) -> Result<()> {
    if !(0..=MAX_RETRY_COUNT).contains(&retry_count) {
        return Err(fail(format!(
            "retry_count must be 0..={MAX_RETRY_COUNT}, got {retry_count}"
        )));
    }
    Ok(())
}

fn validate_retry_delay(retry_delay_secs: i32) -> Result<()> {
    if !(0..=MAX_RETRY_DELAY_SECS).contains(&retry_delay_secs) {
        return Err(fail(format!(
            "retry_delay_secs must be 0..={MAX_RETRY_DELAY_SECS}, got {retry_delay_secs}"
        )));
    }
    Ok(())
}

/// Validate a Schedule's integer sets against their field ranges. `years`
/// carries no range constraint.
pub fn validate_schedule(schedule: &Schedule) -> Result<()> {
    validate_range(&schedule.months, 1, 12, "months")?;
    validate_range(&schedule.days, 1, 31, "days")?;
    validate_range(&schedule.weekdays, 0, 6, "weekdays")?;
    validate_range(&schedule.hours, 0, 23, "hours")?;
    validate_range(&schedule.minutes, 0, 59, "minutes")?;
    Ok(())
}

fn validate_range(set: &IntSet, min: i32, max: i32, field: &str) -> Result<()> {
    for &value in &set.0 {
        if !(min..=max).contains(&value) {
            return Err(fail(format!(
                "schedule field '{field}' must be {min}..={max}, got {value}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NotifyOn;

    fn valid_job() -> NewJob {
        NewJob {
            id: "j1".into(),
            name: "hello".into(),
            description: None,
            script: "echo hi".into(),
            working_dir: "/tmp".into(),
            timeout_secs: 3600,
            retry_count: 0,
            retry_delay_secs: 0,
            enabled: true,
            notify_on: NotifyOn::Failure,
            notify_recipients: vec![],
            timezone: "UTC".into(),
            created_by: None,
        }
    }

    #[test]
    fn accepts_a_well_formed_job() {
        assert!(validate_new_job(&valid_job()).is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        let mut job = valid_job();
        job.name = String::new();
        assert!(validate_new_job(&job).is_err());
    }

    #[test]
    fn rejects_empty_script() {
        let mut job = valid_job();
        job.script = String::new();
        assert!(validate_new_job(&job).is_err());
    }

    #[test]
    fn accepts_script_at_exactly_one_megabyte() {
        let mut job = valid_job();
        job.script = "a".repeat(1_000_000);
        assert!(validate_new_job(&job).is_ok());
    }

    #[test]
    fn rejects_script_one_byte_over_the_cap() {
        let mut job = valid_job();
        job.script = "a".repeat(1_048_577);
        assert!(validate_new_job(&job).is_err());
    }

    #[test]
    fn rejects_timeout_out_of_range() {
        let mut job = valid_job();
        job.timeout_secs = 0;
        assert!(validate_new_job(&job).is_err());
        job.timeout_secs = 86_401;
        assert!(validate_new_job(&job).is_err());
    }

    #[test]
    fn rejects_retry_count_above_ten() {
        let mut job = valid_job();
        job.retry_count = 11;
        assert!(validate_new_job(&job).is_err());
    }

    #[test]
    fn schedule_hour_out_of_range_is_rejected() {
        let schedule = Schedule {
            hours: IntSet(vec![24]),
            ..Schedule::match_any()
        };
        assert!(validate_schedule(&schedule).is_err());
    }

    #[test]
    fn schedule_with_empty_sets_is_accepted() {
        assert!(validate_schedule(&Schedule::match_any()).is_ok());
    }
}
