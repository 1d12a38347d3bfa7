use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SubsecRound, Utc};

/// Drop the sub-second part of a timestamp. All engine arithmetic is in
/// whole seconds and clock reads are floored, never rounded.
pub fn floor_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}

/// UTC midnight at the start of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// UTC midnight at the start of the day containing `t`.
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    day_start(t.date_naive())
}

/// UTC midnight that ends the day containing `t`.
pub fn next_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(t) + Duration::days(1)
}

/// Whole seconds from `start` to `end`, after flooring both. Negative when
/// `end` precedes `start`.
pub fn whole_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (floor_to_second(end) - floor_to_second(start)).num_seconds()
}

/// Timestamp stored as unix seconds.
pub fn to_unix(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
