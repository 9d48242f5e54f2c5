use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SeedError};

/// Rows of evenly spaced timestamps, one row per day-long span.
pub type TimeGrid = Vec<Vec<DateTime<Utc>>>;

/// Whether a timestamp equal to the requested end belongs to the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndBound {
    #[default]
    Exclusive,
    Inclusive,
}

impl EndBound {
    fn admits(self, ts: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        match self {
            EndBound::Exclusive => ts < end,
            EndBound::Inclusive => ts <= end,
        }
    }
}

/// Build a day-partitioned grid over `[start, end)`.
pub fn generate_grid(start: DateTime<Utc>, end: DateTime<Utc>, increment_minutes: u32) -> Result<TimeGrid> {
    generate_grid_with(start, end, increment_minutes, EndBound::Exclusive)
}

/// Build a day-partitioned grid with an explicit end boundary.
///
/// Each row starts at the cursor and collects `cursor + k * increment`
/// while the timestamp is inside the end bound and less than one day past
/// the row start. The cursor then moves to the first timestamp that was not
/// emitted, so consecutive rows neither overlap nor leave a gap. When the
/// increment does not divide a day evenly, row lengths differ.
pub fn generate_grid_with(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    increment_minutes: u32,
    bound: EndBound,
) -> Result<TimeGrid> {
    if increment_minutes == 0 {
        return Err(SeedError::InvalidInput("grid increment must be at least one minute".into()));
    }
    let step = Duration::minutes(increment_minutes as i64);
    let mut grid = Vec::new();
    let mut cursor = start;

    while bound.admits(cursor, end) {
        let day_end = cursor + Duration::days(1);
        let mut row = Vec::new();
        let mut ts = cursor;
        while bound.admits(ts, end) && ts < day_end {
            row.push(ts);
            ts += step;
        }
        if !row.is_empty() {
            grid.push(row);
        }
        cursor = ts;
    }
    Ok(grid)
}

/// Total number of timestamps across all rows.
pub fn slot_count(grid: &TimeGrid) -> usize {
    grid.iter().map(Vec::len).sum()
}
