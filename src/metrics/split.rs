//! Splitting intervals at UTC midnight.

use std::iter::FusedIterator;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::date_util::{floor_to_second, next_midnight};
use crate::error::{Error, Result};

/// The part of an interval that falls on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySegment<P> {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Whole seconds in `[start, end)`, at most 86400.
    pub seconds: i64,
    pub payload: P,
}

/// Lazy sequence of [`DaySegment`]s covering `[start, end)`.
///
/// Segments are chronological, one per calendar day, and their seconds sum
/// to exactly `end - start`. An empty interval yields a single zero-length
/// segment for its day. Cloning or calling [`DaySplit::restart`] replays the
/// sequence from the beginning.
#[derive(Debug, Clone)]
pub struct DaySplit<P> {
    origin: DateTime<Utc>,
    current: DateTime<Utc>,
    end: DateTime<Utc>,
    payload: P,
    done: bool,
}

/// Split `[start, end)` by day, attaching `payload` to every segment.
/// Both bounds are floored to whole seconds first.
pub fn split_by_day<P: Clone>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    payload: P,
) -> Result<DaySplit<P>> {
    let start = floor_to_second(start);
    let end = floor_to_second(end);
    if end < start {
        return Err(Error::InvalidInterval { start, end });
    }
    Ok(DaySplit {
        origin: start,
        current: start,
        end,
        payload,
        done: false,
    })
}

impl<P> DaySplit<P> {
    pub fn restart(&mut self) {
        self.current = self.origin;
        self.done = false;
    }

    /// Total seconds the full sequence covers.
    pub fn total_seconds(&self) -> i64 {
        (self.end - self.origin).num_seconds()
    }
}

impl<P: Clone> Iterator for DaySplit<P> {
    type Item = DaySegment<P>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let midnight = next_midnight(self.current);
        let seg_end = if midnight < self.end {
            midnight
        } else {
            self.done = true;
            self.end
        };
        let segment = DaySegment {
            date: self.current.date_naive(),
            start: self.current,
            end: seg_end,
            seconds: (seg_end - self.current).num_seconds(),
            payload: self.payload.clone(),
        };
        self.current = seg_end;
        Some(segment)
    }
}

impl<P: Clone> FusedIterator for DaySplit<P> {}
