use rand::Rng;

use crate::error::{Result, SeedError};

/// Slack allowed when checking the final, derived sample against the bounds.
const BOUND_EPSILON: f64 = 1e-9;

/// Inclusive value bounds for generated samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_val: f64,
    pub max_val: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self { min_val: 0.0, max_val: 20.0 }
    }
}

/// Generate `count` samples whose mean is exactly `target` and whose values
/// all lie in `bounds`.
///
/// Each of the first `count - 1` samples is drawn uniformly from the window
/// that still leaves the remaining sum reachable by the points after it. The
/// last sample is the exact remainder.
///
/// `count == 1` returns `[target]` without checking the bounds.
pub fn generate_exact_average_bounded<R: Rng>(
    count: usize,
    target: f64,
    bounds: Bounds,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let Bounds { min_val, max_val } = bounds;
    if count == 0 {
        return Err(SeedError::InvalidInput("sample count must be positive".into()));
    }
    if count == 1 {
        // NOTE: single samples bypass the bound check
        return Ok(vec![target]);
    }
    if target < min_val {
        return Err(SeedError::Constraint(format!(
            "target average {} is below minimum bound {}",
            target, min_val
        )));
    }
    if target > max_val {
        return Err(SeedError::Constraint(format!(
            "target average {} is above maximum bound {}",
            target, max_val
        )));
    }

    let mut samples = Vec::with_capacity(count);
    let mut remaining_sum = count as f64 * target;
    let mut remaining_points = count;

    for _ in 0..count - 1 {
        let after = (remaining_points - 1) as f64;
        let lo = min_val.max(remaining_sum - after * max_val);
        let hi = max_val.min(remaining_sum - after * min_val);
        if lo > hi + BOUND_EPSILON {
            return Err(SeedError::Constraint(
                "cannot generate points within bounds for this average".into(),
            ));
        }
        // rounding can push the window inverted by a hair when the target sits on a bound
        let lo = lo.min(hi);
        let point = if lo == hi { lo } else { rng.gen_range(lo..=hi) };
        samples.push(point);
        remaining_sum -= point;
        remaining_points -= 1;
    }

    let last = remaining_sum;
    if last < min_val - BOUND_EPSILON || last > max_val + BOUND_EPSILON {
        return Err(SeedError::Constraint(format!(
            "final sample {} falls outside [{}, {}]",
            last, min_val, max_val
        )));
    }
    samples.push(last);
    Ok(samples)
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}
