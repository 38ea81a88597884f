//! Daily check times.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};

/// The first configured time strictly after `now`, rolling over to the
/// next day when today's slots have all passed. `None` when `times` is
/// empty.
pub fn next_run(times: &[NaiveTime], now: DateTime<Local>) -> Option<DateTime<Local>> {
    let today = now.date_naive();
    (0..=2)
        .flat_map(|offset| {
            let day = today + Duration::days(offset);
            times.iter().map(move |t| day.and_time(*t))
        })
        // A slot that falls in a DST gap does not exist locally; skip it.
        .filter_map(|naive| Local.from_local_datetime(&naive).earliest())
        .filter(|at| *at > now)
        .min()
}

/// How long to wait until the next slot.
pub fn until_next(
    times: &[NaiveTime],
    now: DateTime<Local>,
) -> Option<(DateTime<Local>, std::time::Duration)> {
    let at = next_run(times, now)?;
    let wait = (at - now).to_std().unwrap_or_default();
    Some((at, wait))
}
