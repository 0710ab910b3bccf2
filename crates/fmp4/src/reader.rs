use std::io::{Cursor, Read};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::{Error, Result};

/// Big-endian cursor over a borrowed buffer.
///
/// Every read is bounds checked; running off the end yields the error the
/// reader was created with, so each parser reports its own truncation kind.
pub(crate) struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
    truncated: Error,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize, truncated: Error) -> Self {
        let mut cursor = Cursor::new(data);
        cursor.set_position(pos as u64);
        Self { cursor, truncated }
    }

    pub(crate) fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> &'a [u8] {
        let data = *self.cursor.get_ref();
        &data[self.position().min(data.len())..]
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let rest = self.remaining();
        let slice = rest.get(..len).ok_or_else(|| self.truncated.clone())?;
        self.cursor.set_position((self.position() + len) as u64);
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| self.truncated.clone())
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| self.truncated.clone())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| self.truncated.clone())
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| self.truncated.clone())
    }

    /// 64-bit fields are stored as two 32-bit words: `high * 2^32 + low`.
    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        let high = self.read_u32()? as u64;
        let low = self.read_u32()? as u64;
        Ok((high << 32) | low)
    }

    /// Reads the version byte and 24-bit flags of a full box.
    pub(crate) fn read_version_and_flags(&mut self) -> Result<(u8, u32)> {
        let version = self.read_u8()?;
        let flags = self
            .cursor
            .read_u24::<BigEndian>()
            .map_err(|_| self.truncated.clone())?;
        Ok((version, flags))
    }

    /// Reads a NUL terminated UTF-8 string. The terminator is consumed.
    pub(crate) fn read_cstring(&mut self) -> Result<String> {
        let len = self
            .remaining()
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.truncated.clone())?;
        let mut bytes = vec![0; len + 1];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| self.truncated.clone())?;
        bytes.pop();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub(crate) fn read_u32_at(data: &[u8], pos: usize) -> Option<u32> {
    data.get(pos..pos.checked_add(4)?).map(BigEndian::read_u32)
}

pub(crate) fn write_u32_at(data: &mut [u8], pos: usize, value: u32) {
    BigEndian::write_u32(&mut data[pos..pos + 4], value);
}

pub(crate) fn write_u64_at(data: &mut [u8], pos: usize, value: u64) {
    BigEndian::write_u64(&mut data[pos..pos + 8], value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FourCC;

    fn truncated() -> Error {
        Error::TruncatedBox {
            fourcc: FourCC::FREE,
            offset: 0,
        }
    }

    #[test]
    fn test_read_u64_combines_words() {
        let data = [0, 0, 0, 1, 0, 0, 0, 2];
        let mut reader = ByteReader::new(&data, 0, truncated());
        assert_eq!(reader.read_u64().unwrap(), (1u64 << 32) + 2);
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn test_read_past_end() {
        let data = [0, 0, 1];
        let mut reader = ByteReader::new(&data, 0, truncated());
        assert_eq!(reader.read_u32(), Err(truncated()));
    }

    #[test]
    fn test_version_and_flags() {
        let data = [1, 0, 0x0a, 0x05];
        let mut reader = ByteReader::new(&data, 0, truncated());
        assert_eq!(reader.read_version_and_flags().unwrap(), (1, 0x0a05));
    }

    #[test]
    fn test_read_cstring() {
        let data = b"urn:a\0b\0";
        let mut reader = ByteReader::new(data, 0, truncated());
        assert_eq!(reader.read_cstring().unwrap(), "urn:a");
        assert_eq!(reader.read_cstring().unwrap(), "b");
        assert!(reader.read_cstring().is_err());
    }

    #[test]
    fn test_patch_words() {
        let mut data = [0u8; 12];
        write_u32_at(&mut data, 0, 0x0102_0304);
        write_u64_at(&mut data, 4, 1 << 32);
        assert_eq!(read_u32_at(&data, 0), Some(0x0102_0304));
        assert_eq!(read_u32_at(&data, 4), Some(1));
        assert_eq!(read_u32_at(&data, 10), None);
    }
}
