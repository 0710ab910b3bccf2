use std::fmt;

use crate::{DashError, DashResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Range covering `first..=last`.
    pub fn inclusive(first: u64, last: u64) -> Self {
        Self::new(first, Some(last.saturating_sub(first) + 1))
    }

    /// Parses a single RFC 7233 byte-range-spec, `first-last` or `first-`.
    pub fn parse(s: &str) -> DashResult<Self> {
        let invalid = || DashError::InvalidMediaRange(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;

        let first_byte_pos = start.parse::<u64>().map_err(|_| invalid())?;
        let last_byte_pos = if end.is_empty() {
            None
        } else {
            Some(end.parse::<u64>().map_err(|_| invalid())?)
        };
        if last_byte_pos.is_some_and(|last| last < first_byte_pos) {
            return Err(invalid());
        }

        // 0-500 means 501 bytes
        Ok(Self {
            offset: first_byte_pos,
            length: last_byte_pos.map(|last_byte_pos| last_byte_pos - first_byte_pos + 1),
        })
    }

    pub fn last_byte(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length - 1)
    }

    pub fn to_http_range(&self) -> String {
        format!("bytes={self}")
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_byte() {
            Some(last) => write!(f, "{}-{}", self.offset, last),
            None => write!(f, "{}-", self.offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_http_range() {
        let range = ByteRange::new(10, Some(10));
        assert_eq!(range.to_http_range(), "bytes=10-19");

        let range = ByteRange::new(10, None);
        assert_eq!(range.to_http_range(), "bytes=10-");
    }

    #[test]
    fn test_parse() {
        assert_eq!(ByteRange::parse("0-499").unwrap(), ByteRange::new(0, Some(500)));
        assert_eq!(ByteRange::parse("864-").unwrap(), ByteRange::new(864, None));
        assert_eq!(ByteRange::inclusive(100, 199).to_string(), "100-199");
        assert!(ByteRange::parse("abc").is_err());
        assert!(ByteRange::parse("20-10").is_err());
    }
}
