//! `Range: bytes=start-end` parsing.

use crate::errors::{HarborError, HarborResult};

/// Inclusive byte interval inside an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Never zero: a parsed range always covers at least one byte.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` response header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

fn parse_bound(raw: &str, header: &str) -> HarborResult<Option<u64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HarborError::RangeNotSatisfiable(header.to_string()));
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| HarborError::RangeNotSatisfiable(header.to_string()))
}

/// Resolve a single-range `Range` header against an object of `size` bytes.
///
/// Accepts `bytes=a-b`, `bytes=a-` and the suffix form `bytes=-n`. The result
/// is clamped to `[0, size - 1]`.
pub fn parse_range_header(header: &str, size: u64) -> HarborResult<ByteRange> {
    let unsatisfiable = || HarborError::RangeNotSatisfiable(header.to_string());

    let ranges = header.trim().strip_prefix("bytes=").ok_or_else(unsatisfiable)?;
    let (raw_start, raw_end) = ranges.split_once('-').ok_or_else(unsatisfiable)?;
    let start = parse_bound(raw_start, header)?;
    let end = parse_bound(raw_end, header)?;

    if size == 0 {
        return Err(unsatisfiable());
    }
    let last = size - 1;

    match (start, end) {
        (None, None) => Err(unsatisfiable()),
        (None, Some(0)) => Err(unsatisfiable()),
        (None, Some(suffix)) => Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: last,
        }),
        (Some(start), _) if start > last => Err(unsatisfiable()),
        (Some(start), None) => Ok(ByteRange { start, end: last }),
        (Some(start), Some(end)) if start > end => Err(unsatisfiable()),
        (Some(start), Some(end)) => Ok(ByteRange {
            start,
            end: end.min(last),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn standard_forms() {
        assert_eq!(parse_range_header("bytes=0-99", 1000).unwrap(), range(0, 99));
        assert_eq!(parse_range_header("bytes=-100", 1000).unwrap(), range(900, 999));
        assert_eq!(parse_range_header("bytes=500-", 1000).unwrap(), range(500, 999));
    }

    #[test]
    fn clamps_to_object_size() {
        assert_eq!(parse_range_header("bytes=990-5000", 1000).unwrap(), range(990, 999));
        assert_eq!(parse_range_header("bytes=-5000", 1000).unwrap(), range(0, 999));
    }

    #[test]
    fn rejects_unsatisfiable_ranges() {
        for header in [
            "bytes=500-100",
            "bytes=-",
            "bytes=-0",
            "bytes=1000-",
            "bytes=a-b",
            "bytes=0-1,5-6",
            "items=0-1",
            "0-1",
        ] {
            assert!(
                matches!(
                    parse_range_header(header, 1000),
                    Err(HarborError::RangeNotSatisfiable(_))
                ),
                "{header} should be rejected"
            );
        }
        assert!(parse_range_header("bytes=0-0", 0).is_err());
    }

    #[test]
    fn content_range_header() {
        let r = range(0, 99);
        assert_eq!(r.len(), 100);
        assert_eq!(r.content_range(1000), "bytes 0-99/1000");
    }
}
