use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("range {start}..{end} of {total} bytes is empty or out of bounds")]
    OutOfBounds { start: u64, end: u64, total: u64 },
    #[error("malformed content range: {0}")]
    Malformed(String),
}

/// Byte range of a resumable upload write.
///
/// `end` is exclusive, matching the query parameters of the chunk endpoint.
/// The `Display` form is the `Content-Range` header value of the resumable
/// upload protocol, whose end is inclusive: `bytes start-(end-1)/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    start: u64,
    end: u64,
    total: u64,
}

impl ContentRange {
    pub fn new(start: u64, end: u64, total: u64) -> Result<Self, RangeError> {
        if start >= end || end > total {
            return Err(RangeError::OutOfBounds { start, end, total });
        }
        Ok(Self { start, end, total })
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the range covers the last byte of the object.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.end == self.total
    }

    /// Percentage of the object written once this range is accepted, rounded half up.
    #[must_use]
    pub fn percent(&self) -> u8 {
        percent_of(self.end, self.total)
    }
}

/// `done / total` as a rounded percentage clamped to `0..=100`.
#[must_use]
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u128::from(done.min(total));
    let total = u128::from(total);
    let rounded = (done * 200 + total) / (total * 2);
    u8::try_from(rounded).unwrap_or(100)
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end - 1, self.total)
    }
}

impl FromStr for ContentRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RangeError::Malformed(s.to_owned());
        let spec = s.trim().strip_prefix("bytes ").ok_or_else(malformed)?;
        let (span, total) = spec.split_once('/').ok_or_else(malformed)?;
        let (first, last) = span.split_once('-').ok_or_else(malformed)?;
        let first: u64 = first.parse().map_err(|_| malformed())?;
        let last: u64 = last.parse().map_err(|_| malformed())?;
        let total: u64 = total.parse().map_err(|_| malformed())?;
        let end = last.checked_add(1).ok_or_else(malformed)?;
        Self::new(first, end, total)
    }
}
