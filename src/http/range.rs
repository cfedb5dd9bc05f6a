//! Byte-range arithmetic for the `Range` request header.
//!
//! # Responsibilities
//! - Parse `bytes=a-b,c-d,...` against a known entity length
//! - Resolve open-ended (`a-`) and suffix (`-n`) specs
//! - Drop spans that fall outside the entity
//!
//! # Design Decisions
//! - Ranges keep the order the client sent them in; no merging or de-duplication
//! - A malformed header is unsatisfiable, never a silent full-entity fallback
//! - End offsets past the entity are clamped to `len - 1`

use thiserror::Error;

/// Unit prefix of a byte range set.
const BYTES_UNIT: &str = "bytes=";

/// A resolved, inclusive byte span of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the span.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this span, e.g. `bytes 0-9/100`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// The `Range` header cannot be satisfied for this entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range header: {0}")]
    Malformed(String),

    #[error("no range overlaps an entity of {0} bytes")]
    NoOverlap(u64),
}

/// Resolve a `Range` header against an entity of `len` bytes.
///
/// A missing header yields an empty list, meaning the whole entity is served.
pub fn parse_ranges(header: Option<&str>, len: u64) -> Result<Vec<ByteRange>, RangeError> {
    let Some(header) = header else {
        return Ok(Vec::new());
    };

    let header = header.trim();
    let spec = match header.get(..BYTES_UNIT.len()) {
        Some(unit) if unit.eq_ignore_ascii_case(BYTES_UNIT) => &header[BYTES_UNIT.len()..],
        _ => return Err(RangeError::Malformed(header.to_string())),
    };

    let mut ranges = Vec::new();
    for item in spec.split(',') {
        let (first, last) = item
            .trim()
            .split_once('-')
            .ok_or_else(|| RangeError::Malformed(header.to_string()))?;
        let (first, last) = (first.trim(), last.trim());

        let resolved = match (first.is_empty(), last.is_empty()) {
            // -n: the final n bytes
            (true, false) => {
                let suffix = parse_offset(last, header)?;
                (len.saturating_sub(suffix), len.checked_sub(1))
            }
            // a-: from a to the end
            (false, true) => (parse_offset(first, header)?, len.checked_sub(1)),
            (false, false) => {
                let start = parse_offset(first, header)?;
                let end = parse_offset(last, header)?;
                (start, len.checked_sub(1).map(|max| end.min(max)))
            }
            (true, true) => return Err(RangeError::Malformed(header.to_string())),
        };

        // an empty entity has no last byte, so every span is dropped
        if let (start, Some(end)) = resolved {
            if start <= end && start < len {
                ranges.push(ByteRange { start, end });
            }
        }
    }

    if ranges.is_empty() {
        return Err(RangeError::NoOverlap(len));
    }
    Ok(ranges)
}

fn parse_offset(value: &str, header: &str) -> Result<u64, RangeError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed(header.to_string()));
    }
    value
        .parse()
        .map_err(|_| RangeError::Malformed(header.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn missing_header_serves_whole_entity() {
        assert_eq!(parse_ranges(None, 100), Ok(vec![]));
    }

    #[test]
    fn full_span_is_single_range() {
        for len in [1u64, 2, 100, 4096, u32::MAX as u64] {
            let header = format!("bytes=0-{}", len - 1);
            let ranges = parse_ranges(Some(&header), len).unwrap();
            assert_eq!(ranges, vec![range(0, len - 1)]);
            assert_eq!(ranges[0].size(), len);
        }
    }

    #[test]
    fn open_ended_and_suffix() {
        assert_eq!(parse_ranges(Some("bytes=90-"), 100), Ok(vec![range(90, 99)]));
        assert_eq!(parse_ranges(Some("bytes=-10"), 100), Ok(vec![range(90, 99)]));
        // suffix longer than the entity covers all of it
        assert_eq!(parse_ranges(Some("bytes=-500"), 100), Ok(vec![range(0, 99)]));
    }

    #[test]
    fn end_is_clamped_to_entity() {
        assert_eq!(parse_ranges(Some("bytes=50-1000"), 100), Ok(vec![range(50, 99)]));
    }

    #[test]
    fn multiple_ranges_keep_client_order() {
        let ranges = parse_ranges(Some("bytes=20-29, 0-9,5-14"), 100).unwrap();
        assert_eq!(ranges, vec![range(20, 29), range(0, 9), range(5, 14)]);
    }

    #[test]
    fn out_of_bounds_spans_are_dropped() {
        assert_eq!(
            parse_ranges(Some("bytes=0-9,200-300"), 100),
            Ok(vec![range(0, 9)])
        );
        assert_eq!(
            parse_ranges(Some("bytes=200-300"), 100),
            Err(RangeError::NoOverlap(100))
        );
        assert_eq!(parse_ranges(Some("bytes=-0"), 100), Err(RangeError::NoOverlap(100)));
        assert_eq!(parse_ranges(Some("bytes=9-0"), 100), Err(RangeError::NoOverlap(100)));
        assert_eq!(parse_ranges(Some("bytes=9-0,0-4"), 100), Ok(vec![range(0, 4)]));
        assert_eq!(parse_ranges(Some("bytes=0-"), 0), Err(RangeError::NoOverlap(0)));
    }

    #[test]
    fn malformed_headers_are_unsatisfiable() {
        for header in [
            "",
            "bytes",
            "bytes=",
            "items=0-9",
            "bytes=a-b",
            "bytes=-",
            "bytes=0-9,,20-29",
            "bytes=0-9;20-29",
            "bytes=+1-5",
            "bytes=1--5",
        ] {
            assert!(
                matches!(parse_ranges(Some(header), 100), Err(RangeError::Malformed(_))),
                "{header:?} should be malformed"
            );
        }
    }

    #[test]
    fn content_range_format() {
        assert_eq!(range(0, 9).content_range(100), "bytes 0-9/100");
    }
}
