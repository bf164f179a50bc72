//! Bounds-checked little-endian reader over a byte slice.
//!
//! All multi-byte reads are little-endian. Every read advances the position;
//! reading past the end of the slice fails with [`Error::Truncated`] carrying
//! the offending offset, never a panic.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};

/// Upper bound on a declared uncompressed length. Malformed records can claim
/// arbitrarily large sizes; anything past this is rejected before allocating.
pub const MAX_INFLATE_LEN: usize = 64 * 1024 * 1024;

/// A reading position over a borrowed byte slice.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Move to an absolute offset. Seeking to exactly the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::Truncated { offset: pos });
        }
        self.pos = pos;
        Ok(())
    }

    /// Advance past `n` bytes without reading them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Borrow the next `n` bytes and advance.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated { offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read a fixed 4-byte ASCII tag (record/subrecord/group type codes).
    pub fn read_tag(&mut self) -> Result<[u8; 4]> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Read a NUL-terminated string. Consumes the terminator if present,
    /// otherwise runs to the end of the slice.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                let s = String::from_utf8_lossy(&rest[..end]).into_owned();
                self.pos += end + 1;
                Ok(s)
            }
            None => {
                let s = String::from_utf8_lossy(rest).into_owned();
                self.pos = self.data.len();
                Ok(s)
            }
        }
    }

    /// Read a string prefixed with a 1-byte length.
    pub fn read_string_u8(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Read a u32-length-prefixed string (.dlstrings/.ilstrings heap entries;
    /// the length includes a trailing NUL, which is stripped).
    pub fn read_string_u32(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let trimmed = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }
}

/// Inflate a zlib stream to exactly `expected_len` bytes.
///
/// `expected_len` above [`MAX_INFLATE_LEN`] is rejected up front so a
/// corrupted length field cannot drive a huge allocation.
pub fn inflate(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if expected_len > MAX_INFLATE_LEN {
        return Err(Error::DecompressFailed(format!(
            "declared uncompressed length {} exceeds cap {}",
            expected_len, MAX_INFLATE_LEN
        )));
    }

    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::DecompressFailed(format!("zlib error: {}", e)))?;

    if out.len() != expected_len {
        return Err(Error::DecompressFailed(format!(
            "inflated to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scalar_reads() {
        let data = [0x01, 0x02, 0x00, 0x00, 0x00, 0x80, 0x3F];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.read_u8().unwrap(), 1);
        assert_eq!(cur.read_u16().unwrap(), 2);
        assert_eq!(cur.read_f32().unwrap(), 1.0);
        assert!(cur.is_empty());
    }

    #[test]
    fn test_read_past_end_is_truncated() {
        let mut cur = Cursor::new(&[0xAA, 0xBB]);
        let err = cur.read_u32().unwrap_err();
        assert!(matches!(err, Error::Truncated { offset: 0 }));
        // Position is unchanged after a failed read
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_read_tag() {
        let mut cur = Cursor::new(b"WEAPrest");
        assert_eq!(&cur.read_tag().unwrap(), b"WEAP");
        assert_eq!(cur.position(), 4);
    }

    #[test]
    fn test_cstring_with_and_without_terminator() {
        let mut cur = Cursor::new(b"abc\0def");
        assert_eq!(cur.read_cstring().unwrap(), "abc");
        assert_eq!(cur.read_cstring().unwrap(), "def");
        assert!(cur.is_empty());
    }

    #[test]
    fn test_string_u8() {
        let mut cur = Cursor::new(&[3, b'a', b'b', b'c', 9]);
        assert_eq!(cur.read_string_u8().unwrap(), "abc");
        assert_eq!(cur.remaining(), 1);
    }

    #[test]
    fn test_string_u32_strips_trailing_nul() {
        let mut data = vec![4, 0, 0, 0];
        data.extend_from_slice(b"hi!\0");
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.read_string_u32().unwrap(), "hi!");
    }

    #[test]
    fn test_inflate_round_trip() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = inflate(&compressed, plain.len()).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_inflate_rejects_oversized_declaration() {
        let err = inflate(&[], MAX_INFLATE_LEN + 1).unwrap_err();
        assert!(matches!(err, Error::DecompressFailed(_)));
    }

    #[test]
    fn test_inflate_length_mismatch() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"abcd").unwrap();
        let compressed = encoder.finish().unwrap();
        let err = inflate(&compressed, 99).unwrap_err();
        assert!(matches!(err, Error::DecompressFailed(_)));
    }
}
