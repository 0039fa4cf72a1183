use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use cronwell_core::job::Schedule;
use tracing::warn;

/// Next UTC fire time of `schedule` strictly after `from`.
///
/// `None` when the schedule is exhausted (a `Once` whose instant passed) or
/// cannot be computed (`Cron`, out-of-range fields).
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => (*at > from).then_some(*at),

        Schedule::Interval { every_secs } => {
            let every = i64::try_from(*every_secs).ok().filter(|s| *s > 0)?;
            Some(from + Duration::seconds(every))
        }

        Schedule::Daily { hour, minute } => {
            let candidate = at_time_on(from, 0, *hour, *minute)?;
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }

        Schedule::Weekly { day, hour, minute } => {
            if *day > 6 {
                return None;
            }
            // 0 = Monday, same numbering as `num_days_from_monday`.
            let today = i64::from(from.weekday().num_days_from_monday());
            let ahead = (i64::from(*day) - today).rem_euclid(7);
            let candidate = at_time_on(from, ahead, *hour, *minute)?;
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(7))
            }
        }

        Schedule::Cron { expression } => {
            warn!(%expression, "cron schedules are stored but never fire");
            None
        }
    }
}

/// `hour:minute` UTC on the day `days_ahead` after `from`.
fn at_time_on(from: DateTime<Utc>, days_ahead: i64, hour: u8, minute: u8) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    let day = (from + Duration::days(days_ahead)).date_naive();
    Utc.from_local_datetime(&day.and_time(time)).single()
}

/// Validate a schedule before it is stored.
pub fn validate(schedule: &Schedule) -> Result<(), String> {
    match schedule {
        Schedule::Interval { every_secs: 0 } => Err("interval must be at least 1 second".into()),
        Schedule::Daily { hour, minute } if *hour > 23 || *minute > 59 => {
            Err(format!("invalid time {hour:02}:{minute:02}"))
        }
        Schedule::Weekly { day, hour, minute } if *day > 6 || *hour > 23 || *minute > 59 => {
            Err(format!("invalid weekly schedule day={day} {hour:02}:{minute:02}"))
        }
        _ => Ok(()),
    }
}
