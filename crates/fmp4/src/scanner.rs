//! Primitive box walking shared by every parser in this crate.
//!
//! Only 32-bit box sizes are understood. A declared size of `0` (to end of
//! file) or `1` (64-bit largesize) is rejected with [`Error::MalformedBox`].

use crate::{reader::read_u32_at, Error, FourCC, Result};

pub const BOX_HEADER_SIZE: usize = 8;

/// Location of a single box inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub fourcc: FourCC,
    /// Offset of the size field.
    pub offset: usize,
    /// Declared size, header included.
    pub size: usize,
}

impl BoxHeader {
    pub fn payload_start(&self) -> usize {
        self.offset + BOX_HEADER_SIZE
    }

    pub fn payload_size(&self) -> usize {
        self.size - BOX_HEADER_SIZE
    }

    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Whether the whole box is present in a buffer of `len` bytes.
    pub fn is_complete(&self, len: usize) -> bool {
        self.end() <= len
    }
}

/// Lazy iterator over sibling boxes in `[start, end)`.
///
/// A box whose declared end lies beyond the scanned range is still yielded;
/// deciding whether more bytes are needed is up to the caller. Scanning stops
/// when fewer than [`BOX_HEADER_SIZE`] bytes remain.
pub struct BoxScanner<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
    failed: bool,
}

impl<'a> BoxScanner<'a> {
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self::range(data, offset, data.len())
    }

    pub fn range(data: &'a [u8], start: usize, end: usize) -> Self {
        Self {
            data,
            pos: start,
            end: end.min(data.len()),
            failed: false,
        }
    }

    /// Scans the children of `parent`. `skip` bytes after the parent header
    /// are ignored (version/flags of a full box, entry counts...).
    pub fn children(data: &'a [u8], parent: &BoxHeader, skip: usize) -> Self {
        Self::range(data, parent.payload_start() + skip, parent.end())
    }

    /// Finds the first sibling box of the given type.
    pub fn find_box(mut self, fourcc: FourCC) -> Result<Option<BoxHeader>> {
        self.find_map(|header| match header {
            Ok(header) if header.fourcc == fourcc => Some(Ok(header)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .transpose()
    }
}

impl Iterator for BoxScanner<'_> {
    type Item = Result<BoxHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos + BOX_HEADER_SIZE > self.end {
            return None;
        }

        let offset = self.pos;
        let size = read_u32_at(self.data, offset)?;
        let fourcc = FourCC([
            self.data[offset + 4],
            self.data[offset + 5],
            self.data[offset + 6],
            self.data[offset + 7],
        ]);

        if (size as usize) < BOX_HEADER_SIZE {
            self.failed = true;
            return Some(Err(Error::MalformedBox {
                fourcc,
                offset,
                size,
            }));
        }

        let header = BoxHeader {
            fourcc,
            offset,
            size: size as usize,
        };
        self.pos = header.end();
        Some(Ok(header))
    }
}

/// Rewrites the type of a parsed box to `free` so later scans treat it as
/// padding. This is a destructive, in-place transform of the caller's buffer.
pub fn mark_consumed(data: &mut [u8], header: &BoxHeader) {
    data[header.offset + 4..header.offset + 8].copy_from_slice(FourCC::FREE.as_bytes());
}
