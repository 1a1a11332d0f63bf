use tracing::debug;

use crate::config::PolicyConfig;
use crate::error::RangeError;
use crate::ByteRange;

/// A normalized byte-range-set, in the order the client sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeParseResult {
    pub ranges: Vec<ByteRange>,
    /// Sum of the widths of all parts, after truncation.
    pub total_length: u64,
}

/// Parse a `Range` header value against a resource of `file_size` bytes.
///
/// Suffix and open-ended specs are expanded, ends are optionally clamped and
/// then truncated to `max_chunk_length`. Out-of-bounds or inverted parts are
/// passed through untouched so [`crate::policy`] can reject them.
pub fn parse_range_header(
    header: &str,
    file_size: u64,
    config: &PolicyConfig,
) -> Result<RangeParseResult, RangeError> {
    let (unit, specs) = header.trim().split_once('=').ok_or(RangeError::InvalidUnit)?;
    if unit != "bytes" {
        return Err(RangeError::InvalidUnit);
    }

    if file_size == 0 {
        return Err(RangeError::not_satisfiable(file_size));
    }
    let last = file_size - 1;
    let max_chunk_length = config.max_chunk_length.max(1);

    let mut ranges = Vec::new();
    let mut total_length = 0u64;
    for spec in specs.split(',').map(str::trim) {
        if spec.is_empty() {
            continue;
        }

        let mut range = parse_spec(spec, file_size)
            .ok_or_else(|| RangeError::not_satisfiable(file_size))?;

        if config.clamp_to_file_bounds {
            range.end = range.end.min(last);
        }

        if range.len() > max_chunk_length {
            range.end = range.start + (max_chunk_length - 1);
        }

        total_length = total_length.saturating_add(range.len());
        ranges.push(range);
    }

    if ranges.is_empty() {
        return Err(RangeError::not_satisfiable(file_size));
    }

    debug!(header, file_size, parts = ranges.len(), total_length, "parsed range header");
    Ok(RangeParseResult { ranges, total_length })
}

fn parse_spec(spec: &str, file_size: u64) -> Option<ByteRange> {
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        // "-N": the final N bytes; a suffix longer than the resource covers all of it
        (true, false) => {
            let suffix = parse_pos(end)?;
            Some(ByteRange::new(file_size.saturating_sub(suffix), file_size - 1))
        }
        (false, true) => Some(ByteRange::new(parse_pos(start)?, file_size - 1)),
        (false, false) => Some(ByteRange::new(parse_pos(start)?, parse_pos(end)?)),
    }
}

fn parse_pos(digits: &str) -> Option<u64> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
