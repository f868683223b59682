//! Pure predicate over wall-clock instants and [`Schedule`]s.
//!
//! No I/O, no locking — everything here is a plain function so the
//! Scheduler's tick loop can call it without touching the Store.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::store::Schedule;

/// One-year linear-scan horizon for [`next_fire`].
const HORIZON_DAYS: i64 = 366;

/// Does `t` (converted to `tz`'s wall clock) satisfy every field of
/// `schedule`? An empty field matches any value (§4.1).
pub fn matches(t: DateTime<Utc>, schedule: &Schedule, tz: Tz) -> bool {
    let local = t.with_timezone(&tz);

    schedule.years.matches(local.year())
        && schedule.months.matches(local.month() as i32)
        && schedule.days.matches(local.day() as i32)
        && schedule.weekdays.matches(weekday_number(&local))
        && schedule.hours.matches(local.hour() as i32)
        && schedule.minutes.matches(local.minute() as i32)
}

/// `chrono`'s `Weekday` numbers Monday as 0; schedules here want Sunday as 0.
fn weekday_number<Tzv: TimeZone>(local: &DateTime<Tzv>) -> i32 {
    local.weekday().num_days_from_sunday() as i32
}

/// Linear forward scan at one-minute resolution, starting the minute after
/// `after`, up to a 366-day horizon. Returns `None` if nothing matches
/// in-horizon.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let start = truncate_to_minute(after) + Duration::minutes(1);
    let limit = start + Duration::days(HORIZON_DAYS);

    let mut candidate = start;
    while candidate < limit {
        if matches(candidate, schedule, tz) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

/// Drops sub-minute precision; used both by the forward scan above and by
/// the scheduler's duplicate-suppression check (§4.2 step 2c).
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(t.second() as i64) - Duration::nanoseconds(t.nanosecond() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IntSet;

    fn utc_ymd_hm(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn empty_schedule_matches_every_minute() {
        let schedule = Schedule::match_any();
        assert!(matches(utc_ymd_hm(2026, 7, 28, 3, 17), &schedule, Tz::UTC));
    }

    #[test]
    fn hour_minute_boundary_matches() {
        let schedule = Schedule {
            hours: IntSet(vec![23]),
            minutes: IntSet(vec![59]),
            ..Schedule::match_any()
        };
        assert!(matches(utc_ymd_hm(2026, 7, 28, 23, 59), &schedule, Tz::UTC));
        assert!(!matches(utc_ymd_hm(2026, 7, 29, 0, 0), &schedule, Tz::UTC));
    }

    #[test]
    fn midnight_matches_zero_zero() {
        let schedule = Schedule {
            hours: IntSet(vec![0]),
            minutes: IntSet(vec![0]),
            ..Schedule::match_any()
        };
        assert!(matches(utc_ymd_hm(2026, 1, 1, 0, 0), &schedule, Tz::UTC));
    }

    #[test]
    fn leap_day_matches_only_in_leap_years() {
        let schedule = Schedule {
            months: IntSet(vec![2]),
            days: IntSet(vec![29]),
            ..Schedule::match_any()
        };
        assert!(matches(utc_ymd_hm(2024, 2, 29, 12, 0), &schedule, Tz::UTC));
        // 2026 is not a leap year; Feb 29 2026 does not exist, so no instant
        // in February 2026 can satisfy day == 29.
        for day in 1..=28 {
            assert!(!matches(utc_ymd_hm(2026, 2, day, 12, 0), &schedule, Tz::UTC));
        }
    }

    #[test]
    fn weekday_zero_is_sunday() {
        // 2026-07-26 is a Sunday.
        let schedule = Schedule {
            weekdays: IntSet(vec![0]),
            ..Schedule::match_any()
        };
        assert!(matches(utc_ymd_hm(2026, 7, 26, 9, 0), &schedule, Tz::UTC));
        assert!(!matches(utc_ymd_hm(2026, 7, 27, 9, 0), &schedule, Tz::UTC));
    }

    #[test]
    fn next_fire_finds_next_matching_minute() {
        let schedule = Schedule {
            hours: IntSet(vec![23]),
            minutes: IntSet(vec![59]),
            ..Schedule::match_any()
        };
        let after = utc_ymd_hm(2026, 7, 28, 10, 0);
        let fired = next_fire(&schedule, after, Tz::UTC).expect("should find a match");
        assert_eq!(fired, utc_ymd_hm(2026, 7, 28, 23, 59));
    }

    #[test]
    fn next_fire_returns_none_for_impossible_schedule() {
        // Feb 30th never exists.
        let schedule = Schedule {
            months: IntSet(vec![2]),
            days: IntSet(vec![30]),
            ..Schedule::match_any()
        };
        let after = utc_ymd_hm(2026, 1, 1, 0, 0);
        assert_eq!(next_fire(&schedule, after, Tz::UTC), None);
    }
}
