//! Pairs grid timestamps with reading values and renders data points.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::{Result, SeedError};
use crate::grid::{generate_grid, TimeGrid};
use crate::logging::{log, obj, Domain, Level};
use crate::quota::{daily_split, duplicate_entries};
use crate::sampler::{generate_exact_average_bounded, Bounds};
use crate::scenario::{CgmWindow, LowHighWindow, SmbgWindow};
use crate::templates::DataPointTemplate;

pub const CGM_INCREMENT_MINUTES: u32 = 5;
const MINUTES_PER_DAY: usize = 1440;

/// Glucose levels used by the low/high SMBG scenarios, in mmol/L.
pub const LOW_READING: f64 = 3.0;
pub const IN_RANGE_READING: f64 = 6.0;
pub const HIGH_READING: f64 = 14.0;

/// Fit every row to `values.len()` (truncate, or pad with `None`) and zip
/// the row with `values` index-wise.
pub fn resize_and_pair<T: Clone, V: Clone>(rows: &[Vec<T>], values: &[V]) -> Vec<Vec<(Option<T>, V)>> {
    rows.iter()
        .map(|row| {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (row.get(i).cloned(), v.clone()))
                .collect()
        })
        .collect()
}

/// Like [`resize_and_pair`] but pads short rows with `default`.
pub fn resize_and_pair_with_default<T: Clone, V: Clone>(
    rows: &[Vec<T>],
    values: &[V],
    default: T,
) -> Vec<Vec<(T, V)>> {
    rows.iter()
        .map(|row| {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (row.get(i).cloned().unwrap_or_else(|| default.clone()), v.clone()))
                .collect()
        })
        .collect()
}

/// Render one data point per (timestamp, value) pair, row by row.
///
/// Pairs that came from padding have no timestamp and produce no point.
pub fn assemble(grid: &TimeGrid, values: &[f64], template: &DataPointTemplate) -> Vec<Value> {
    let paired = resize_and_pair(grid, values);
    let mut points = Vec::with_capacity(grid.len() * values.len());
    let mut padded = 0usize;
    for row in paired {
        for (ts, v) in row {
            match ts {
                Some(ts) => points.push(template.instantiate(ts, v)),
                None => padded += 1,
            }
        }
    }
    if padded > 0 {
        log(
            Level::Debug,
            Domain::Generate,
            "assemble_padding_skipped",
            obj(&[("kind", json!(template.kind())), ("skipped", json!(padded))]),
        );
    }
    points
}

/// CGM readings at 5-minute spacing, split each day between the window's
/// two values by usage and time-in-range percentages.
pub fn cgm_payload(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window: &CgmWindow,
    template: &DataPointTemplate,
) -> Result<Vec<Value>> {
    let counts = daily_split(window.usage_pct, window.tir_pct);
    let values = duplicate_entries(&[window.first_value, window.second_value], &counts);
    let grid = generate_grid(start, end, CGM_INCREMENT_MINUTES)?;
    let points = assemble(&grid, &values, template);
    log(
        Level::Debug,
        Domain::Generate,
        "cgm_payload",
        obj(&[
            ("days", json!(grid.len())),
            ("per_day", json!(values.len())),
            ("first_count", json!(counts[0])),
            ("second_count", json!(counts[1])),
            ("points", json!(points.len())),
        ]),
    );
    Ok(points)
}

/// `readings_per_day` finger-stick readings a day, evenly spaced, whose
/// mean is exactly the window's average.
pub fn smbg_payload<R: Rng>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window: &SmbgWindow,
    bounds: Bounds,
    template: &DataPointTemplate,
    rng: &mut R,
) -> Result<Vec<Value>> {
    if window.readings_per_day == 0 {
        return Err(SeedError::InvalidInput("readings per day must be positive".into()));
    }
    let increment = (MINUTES_PER_DAY / window.readings_per_day).max(1) as u32;
    let values = generate_exact_average_bounded(window.readings_per_day, window.average, bounds, rng)?;
    let grid = generate_grid(start, end, increment)?;
    let points = assemble(&grid, &values, template);
    log(
        Level::Debug,
        Domain::Generate,
        "smbg_payload",
        obj(&[
            ("days", json!(grid.len())),
            ("increment_minutes", json!(increment)),
            ("per_day", json!(values.len())),
            ("points", json!(points.len())),
        ]),
    );
    Ok(points)
}

/// One in-range reading a day plus the window's low and high events, in
/// shuffled order over evenly spaced timestamps.
pub fn smbg_low_high_payload<R: Rng>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window: &LowHighWindow,
    template: &DataPointTemplate,
    rng: &mut R,
) -> Result<Vec<Value>> {
    if start >= end {
        return Ok(Vec::new());
    }
    let span_minutes = (end - start).num_minutes().max(1) as usize;
    let days = span_minutes.div_ceil(MINUTES_PER_DAY);
    let total = days + window.low_count + window.high_count;
    let increment = (span_minutes / total).max(1) as u32;

    let mut values = duplicate_entries(
        &[LOW_READING, IN_RANGE_READING, HIGH_READING],
        &[window.low_count, days, window.high_count],
    );
    values.shuffle(rng);

    let slots: Vec<DateTime<Utc>> = generate_grid(start, end, increment)?
        .into_iter()
        .flatten()
        .take(values.len())
        .collect();
    if slots.len() < values.len() {
        return Err(SeedError::Constraint(format!(
            "window holds {} slots but {} readings were requested",
            slots.len(),
            values.len()
        )));
    }
    Ok(slots
        .into_iter()
        .zip(values)
        .map(|(ts, v)| template.instantiate(ts, v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::TemplateSet;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_resize_truncates_and_pads() {
        let rows = vec![vec![1, 2, 3, 4, 5], vec![6, 7]];
        let out = resize_and_pair(&rows, &["a", "b", "c"]);
        assert_eq!(out[0], vec![(Some(1), "a"), (Some(2), "b"), (Some(3), "c")]);
        assert_eq!(out[1], vec![(Some(6), "a"), (Some(7), "b"), (None, "c")]);
        assert!(out.iter().all(|r| r.len() == 3));
    }

    #[test]
    fn test_resize_with_default() {
        let rows = vec![vec!["x"], vec!["y", "z", "w"]];
        let out = resize_and_pair_with_default(&rows, &[1, 2], "-");
        assert_eq!(out[0], vec![("x", 1), ("-", 2)]);
        assert_eq!(out[1], vec![("y", 1), ("z", 2)]);
    }

    #[test]
    fn test_assemble_preserves_order_and_skips_padding() {
        let tpl = TemplateSet::embedded().unwrap().cbg;
        let s = start();
        let grid = vec![
            vec![s, s + Duration::minutes(5), s + Duration::minutes(10)],
            vec![s + Duration::days(1)],
        ];
        let points = assemble(&grid, &[4.0, 5.0], &tpl);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0]["value"], 4.0);
        assert_eq!(points[1]["value"], 5.0);
        assert_eq!(points[2]["time"], "2024-02-02T00:00:00.000Z");
    }

    #[test]
    fn test_cgm_payload_counts() {
        let tpl = TemplateSet::embedded().unwrap().cbg;
        let w = CgmWindow::new(3.8, 3.9, 75.0, 1.0);
        let points = cgm_payload(start(), start() + Duration::days(14), &w, &tpl).unwrap();
        // 216 readings per day over 14 days
        assert_eq!(points.len(), 216 * 14);
        let low = points.iter().filter(|p| p["value"] == 3.8).count();
        assert_eq!(low, 3 * 14);
    }

    #[test]
    fn test_smbg_payload_daily_mean() {
        let tpl = TemplateSet::embedded().unwrap().smbg;
        let mut rng = StdRng::seed_from_u64(11);
        let w = SmbgWindow { average: 10.1, readings_per_day: 15 };
        let points = smbg_payload(start(), start() + Duration::days(3), &w, Bounds::default(), &tpl, &mut rng).unwrap();
        assert_eq!(points.len(), 45);
        let first_day: f64 = points[..15].iter().map(|p| p["value"].as_f64().unwrap()).sum();
        assert!((first_day / 15.0 - 10.1).abs() < 1e-9);
        assert!(points.iter().all(|p| p["type"] == "smbg"));
    }

    #[test]
    fn test_smbg_infeasible_average_propagates() {
        let tpl = TemplateSet::embedded().unwrap().smbg;
        let mut rng = StdRng::seed_from_u64(1);
        let w = SmbgWindow { average: 25.0, readings_per_day: 4 };
        let err = smbg_payload(start(), start() + Duration::days(1), &w, Bounds::default(), &tpl, &mut rng)
            .unwrap_err();
        assert_eq!(err.code(), "constraint");
    }

    #[test]
    fn test_low_high_counts() {
        let tpl = TemplateSet::embedded().unwrap().smbg;
        let mut rng = StdRng::seed_from_u64(5);
        let w = LowHighWindow { low_count: 15, high_count: 10 };
        let points = smbg_low_high_payload(start(), start() + Duration::days(14), &w, &tpl, &mut rng).unwrap();
        assert_eq!(points.len(), 14 + 25);
        let lows = points.iter().filter(|p| p["value"] == LOW_READING).count();
        let highs = points.iter().filter(|p| p["value"] == HIGH_READING).count();
        assert_eq!((lows, highs), (15, 10));
    }
}
