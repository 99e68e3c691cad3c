use chrono::{Datelike, Days, NaiveDate, TimeZone};

use crate::models::{Survey, DAYS_PER_WEEK};

/// Unix seconds of local midnight on `date`. On a DST gap the earliest valid
/// instant of that day is used.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            let one_am = date.and_hms_opt(1, 0, 0)?;
            tz.from_local_datetime(&one_am).earliest()
        })
        .map(|dt| dt.timestamp())
}

/// First weekly occurrence of `survey` strictly after `now`, scanning seven
/// days starting with today in `tz`. Ties go to the earliest day, then the
/// earliest offset of that day.
pub fn next_occurrence<Tz: TimeZone>(survey: &Survey, now: i64, tz: &Tz) -> Option<i64> {
    let today = tz.timestamp_opt(now, 0).single()?.date_naive();
    let today_idx = today.weekday().num_days_from_sunday() as usize;

    for day in 0..DAYS_PER_WEEK {
        let offsets = survey.day_timings((today_idx + day) % DAYS_PER_WEEK);
        if offsets.is_empty() {
            continue;
        }
        let date = today.checked_add_days(Days::new(day as u64))?;
        let day_begin = local_midnight(date, tz)?;
        if let Some(at) = offsets
            .into_iter()
            .map(|offset| day_begin + i64::from(offset))
            .find(|at| *at > now)
        {
            return Some(at);
        }
    }
    None
}
