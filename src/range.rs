//! `Range` header parsing.
//!
//! Only single `bytes=<start>-<end>` ranges are understood, with the end
//! optional. Anything else (multi-range, suffix ranges, other units, garbage)
//! is reported by [`parse_range_header`] and then ignored by [`parse_range`],
//! so the object is served in full.

use thiserror::Error;

/// A requested byte range. `end` is inclusive; `None` means "to the end of
/// the object", resolved once the size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub end: Option<u64>,
}

/// A range validated against an object's size. Both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub offset: u64,
    pub end: u64,
    pub total: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidRange {
    #[error("range unit must be `bytes`")]
    UnsupportedUnit,
    #[error("multiple ranges are not supported")]
    MultipleRanges,
    #[error("suffix ranges are not supported")]
    Suffix,
    #[error("malformed range `{0}`")]
    Malformed(String),
    #[error("range end {end} precedes start {offset}")]
    Inverted { offset: u64, end: u64 },
}

/// Strict parse of a `Range` header value.
pub fn parse_range_header(value: &str) -> Result<ByteRange, InvalidRange> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(InvalidRange::UnsupportedUnit)?
        .trim();

    if spec.contains(',') {
        return Err(InvalidRange::MultipleRanges);
    }
    if spec.starts_with('-') {
        return Err(InvalidRange::Suffix);
    }

    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| InvalidRange::Malformed(spec.to_string()))?;
    let offset = start
        .trim()
        .parse::<u64>()
        .map_err(|_| InvalidRange::Malformed(spec.to_string()))?;

    let end = end.trim();
    if end.is_empty() {
        return Ok(ByteRange { offset, end: None });
    }
    let end = end
        .parse::<u64>()
        .map_err(|_| InvalidRange::Malformed(spec.to_string()))?;
    if end < offset {
        return Err(InvalidRange::Inverted { offset, end });
    }

    Ok(ByteRange {
        offset,
        end: Some(end),
    })
}

/// Permissive parse: a missing or invalid header means no range was requested.
pub fn parse_range(value: Option<&str>) -> Option<ByteRange> {
    let value = value?;
    match parse_range_header(value) {
        Ok(range) => Some(range),
        Err(err) => {
            tracing::debug!("ignoring Range header `{}`: {}", value, err);
            None
        }
    }
}

impl ByteRange {
    /// Resolve against an object of `total` bytes.
    ///
    /// An end past the object is clamped. Returns `None` when the range
    /// starts at or beyond the end of the object.
    pub fn resolve(&self, total: u64) -> Option<ResolvedRange> {
        if self.offset >= total {
            return None;
        }
        let last = total - 1;
        let end = self.end.map_or(last, |e| e.min(last));
        Some(ResolvedRange {
            offset: self.offset,
            end,
            total,
        })
    }
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.offset + 1
    }

    /// Value for the `content-range` response header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.offset, self.end, self.total)
    }
}
