//! Acceptance rules for a parsed byte-range-set.
//!
//! Besides the plain bounds check, a range set is scored for the shapes that
//! make multi-range requests an amplification vector: many tiny parts,
//! overlapping parts, and shuffled parts. The scorer is a single stateless
//! pass over one request. It raises the cost of the obvious attacks but is
//! not a complete defense; a patient client can still issue many requests
//! that each stay under the threshold.

use tracing::{debug, warn};

use crate::config::{PolicyConfig, ScoreWeights};
use crate::error::RangeError;
use crate::ByteRange;

/// Abuse score of a range set, in client order.
pub fn score(ranges: &[ByteRange], weights: &ScoreWeights) -> f64 {
    let mut points: u64 = 0;
    let mut shuffled = false;
    let mut previous: Option<&ByteRange> = None;

    for range in ranges {
        if range.start > range.end {
            points += u64::from(weights.invalid_order);
        }
        if range.len() < weights.small_range {
            points += u64::from(weights.small);
        }

        if let Some(previous) = previous {
            // sticky: once shuffled, the multiplier applies to the whole sum
            if range.start < previous.start {
                shuffled = true;
            }
            if overlaps(previous, range) {
                points += u64::from(weights.cross);
            }
        }
        previous = Some(range);
    }

    let multiplier = if shuffled { weights.sort_multiplier } else { 1.0 };
    points as f64 * multiplier
}

/// Two parts overlap when their union is narrower than their widths combined.
fn overlaps(a: &ByteRange, b: &ByteRange) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let union = ByteRange::new(a.start.min(b.start), a.end.max(b.end));
    union.len() < a.len().saturating_add(b.len())
}

/// Whether the heuristic lets this set through.
pub fn accept(ranges: &[ByteRange], config: &PolicyConfig) -> bool {
    !config.reject_adversarial || score(ranges, &config.scoring) < config.scoring.threshold
}

/// Bounds check followed by the heuristic.
///
/// Every part must satisfy `start <= end < file_size` regardless of whether
/// heuristic rejection is enabled.
pub fn check(ranges: &[ByteRange], file_size: u64, config: &PolicyConfig) -> Result<(), RangeError> {
    if let Some(bad) = ranges.iter().find(|r| r.start > r.end || r.end >= file_size) {
        debug!(start = bad.start, end = bad.end, file_size, "range out of bounds");
        return Err(RangeError::not_satisfiable(file_size));
    }

    if !config.reject_adversarial {
        return Ok(());
    }

    let points = score(ranges, &config.scoring);
    if points >= config.scoring.threshold {
        warn!(parts = ranges.len(), score = points, file_size, "rejecting adversarial range set");
        return Err(RangeError::not_satisfiable(file_size));
    }

    debug!(parts = ranges.len(), score = points, "range set accepted");
    Ok(())
}
