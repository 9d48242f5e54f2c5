//! Percentage-to-count arithmetic for daily reading budgets.

use serde::Serialize;

/// Five-minute slots in a day.
pub const DEFAULT_BASE: u32 = 288;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoundedUp {
    pub percentage: f64,
    pub exact_value: f64,
    pub rounded_up: i64,
    pub remainder: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoundedDown {
    pub percentage: f64,
    pub exact_value: f64,
    pub rounded_down: i64,
    pub remainder: i64,
}

/// `ceil(pct / 100 * base)` and what is left of `base`.
pub fn percentage_round_up(percentage: f64, base: u32) -> RoundedUp {
    let exact_value = percentage / 100.0 * base as f64;
    let rounded_up = exact_value.ceil() as i64;
    RoundedUp {
        percentage,
        exact_value,
        rounded_up,
        remainder: base as i64 - rounded_up,
    }
}

/// `floor(pct / 100 * base)` and what is left of `base`.
pub fn percentage_round_down(percentage: f64, base: u32) -> RoundedDown {
    let exact_value = percentage / 100.0 * base as f64;
    let rounded_down = exact_value.floor() as i64;
    RoundedDown {
        percentage,
        exact_value,
        rounded_down,
        remainder: base as i64 - rounded_down,
    }
}

/// Repeat `values[i]` `counts[i]` times, in order. Values without a count
/// are dropped.
pub fn duplicate_entries<T: Clone>(values: &[T], counts: &[usize]) -> Vec<T> {
    values
        .iter()
        .enumerate()
        .flat_map(|(i, v)| std::iter::repeat(v.clone()).take(counts.get(i).copied().unwrap_or(0)))
        .collect()
}

/// Split one day's CGM budget into `[first, second]` reading counts.
///
/// `usage_pct` of the 288 daily slots carry a reading (rounded down);
/// `tir_pct` of those (rounded up) take the first value and the rest take
/// the second. Out-of-range percentages saturate at zero counts.
pub fn daily_split(usage_pct: f64, tir_pct: f64) -> [usize; 2] {
    let usage = percentage_round_down(usage_pct, DEFAULT_BASE);
    let used = usage.rounded_down.max(0) as u32;
    let split = percentage_round_up(tir_pct, used);
    [split.rounded_up.max(0) as usize, split.remainder.max(0) as usize]
}
