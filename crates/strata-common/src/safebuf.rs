//! Bounds-checked byte buffer views.
//!
//! Every serialized structure in strata (node blocks, intervals, checkpoint
//! records) writes through a `SafeWriter` and reads through a `SafeReader`.
//! A view only ever touches `[0, len)` of the slice it was created over, so an
//! interval serializing itself inside a node block cannot overrun into its
//! neighbours. Writes that do not fit fail with
//! `StrataError::SerializationOverflow` before any byte is written.
//!
//! Layout conventions:
//! - All integers are little-endian, fixed width.
//! - Strings and byte strings are prefixed with their length as a u16.

use crate::error::{Result, StrataError};
use bytes::{Buf, BufMut};

/// Size of the length prefix in front of strings and byte strings.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Maximum length of a string or byte string payload.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Returns the number of bytes `s` occupies once written with `put_string`.
pub fn string_size_in_buffer(s: &str) -> usize {
    LENGTH_PREFIX_SIZE + s.len()
}

/// Writer confined to a fixed-size slice.
pub struct SafeWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SafeWriter<'a> {
    /// Creates a writer over the whole slice.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Creates a writer confined to `buf[offset..offset + size]`.
    pub fn view(buf: &'a mut [u8], offset: usize, size: usize) -> Result<Self> {
        let end = offset.checked_add(size).filter(|end| *end <= buf.len()).ok_or(
            StrataError::SerializationOverflow {
                needed: offset.saturating_add(size),
                available: buf.len(),
            },
        )?;
        Ok(Self::new(&mut buf[offset..end]))
    }

    /// Current write position relative to the view origin.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total size of the view.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes left before the view limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    fn reserve(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(StrataError::SerializationOverflow {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    #[inline]
    fn dst(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.reserve(1)?;
        self.dst().put_u8(v);
        self.pos += 1;
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<()> {
        self.reserve(2)?;
        self.dst().put_u16_le(v);
        self.pos += 2;
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.reserve(4)?;
        self.dst().put_u32_le(v);
        self.pos += 4;
        Ok(())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<()> {
        self.reserve(4)?;
        self.dst().put_i32_le(v);
        self.pos += 4;
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<()> {
        self.reserve(8)?;
        self.dst().put_u64_le(v);
        self.pos += 8;
        Ok(())
    }

    pub fn put_i64(&mut self, v: i64) -> Result<()> {
        self.reserve(8)?;
        self.dst().put_i64_le(v);
        self.pos += 8;
        Ok(())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<()> {
        self.reserve(8)?;
        self.dst().put_f64_le(v);
        self.pos += 8;
        Ok(())
    }

    /// Writes raw bytes without a length prefix.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.reserve(src.len())?;
        self.dst().put_slice(src);
        self.pos += src.len();
        Ok(())
    }

    /// Writes a u16 length prefix followed by the bytes.
    pub fn put_bytes(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > MAX_STRING_LEN {
            return Err(StrataError::SerializationOverflow {
                needed: src.len(),
                available: MAX_STRING_LEN,
            });
        }
        self.reserve(LENGTH_PREFIX_SIZE + src.len())?;
        self.put_u16(src.len() as u16)?;
        self.put_slice(src)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, s: &str) -> Result<()> {
        self.put_bytes(s.as_bytes())
    }

    /// Writes `count` zero bytes.
    pub fn put_zeros(&mut self, count: usize) -> Result<()> {
        self.reserve(count)?;
        self.buf[self.pos..self.pos + count].fill(0);
        self.pos += count;
        Ok(())
    }

    /// Carves out an isolated writer over the next `size` bytes and advances
    /// past them.
    pub fn sub_writer(&mut self, size: usize) -> Result<SafeWriter<'_>> {
        self.reserve(size)?;
        let start = self.pos;
        self.pos += size;
        Ok(SafeWriter::new(&mut self.buf[start..start + size]))
    }
}

/// Reader confined to a fixed-size slice.
pub struct SafeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SafeReader<'a> {
    /// Creates a reader over the whole slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Creates a reader confined to `buf[offset..offset + size]`.
    pub fn view(buf: &'a [u8], offset: usize, size: usize) -> Result<Self> {
        let end = offset.checked_add(size).filter(|end| *end <= buf.len()).ok_or(
            StrataError::Truncated {
                needed: offset.saturating_add(size),
                available: buf.len(),
            },
        )?;
        Ok(Self::new(&buf[offset..end]))
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    fn require(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(StrataError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    #[inline]
    fn src(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.src().get_u8();
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = self.src().get_u16_le();
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = self.src().get_u32_le();
        self.pos += 4;
        Ok(v)
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.require(4)?;
        let v = self.src().get_i32_le();
        self.pos += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = self.src().get_u64_le();
        self.pos += 8;
        Ok(v)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.require(8)?;
        let v = self.src().get_i64_le();
        self.pos += 8;
        Ok(v)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.require(8)?;
        let v = self.src().get_f64_le();
        self.pos += 8;
        Ok(v)
    }

    /// Reads `len` raw bytes.
    pub fn get_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Reads a u16-length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u16()? as usize;
        self.get_slice(len)
    }

    /// Reads a u16-length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StrataError::Internal(format!("invalid UTF-8 in string: {e}")))
    }

    /// Skips `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.require(count)?;
        self.pos += count;
        Ok(())
    }

    /// Carves out an isolated reader over the next `size` bytes and advances
    /// past them.
    pub fn sub_reader(&mut self, size: usize) -> Result<SafeReader<'a>> {
        let slice = self.get_slice(size)?;
        Ok(SafeReader::new(slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_primitives() {
        let mut buf = [0u8; 64];
        {
            let mut w = SafeWriter::new(&mut buf);
            w.put_u8(0xAB).unwrap();
            w.put_u16(0xBEEF).unwrap();
            w.put_u32(0xDEAD_BEEF).unwrap();
            w.put_i32(-7).unwrap();
            w.put_u64(u64::MAX - 1).unwrap();
            w.put_i64(-123_456_789).unwrap();
            w.put_f64(3.5).unwrap();
            assert_eq!(w.position(), 1 + 2 + 4 + 4 + 8 + 8 + 8);
        }

        let mut r = SafeReader::new(&buf);
        assert_eq!(r.get_u8().unwrap(), 0xAB);
        assert_eq!(r.get_u16().unwrap(), 0xBEEF);
        assert_eq!(r.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_i32().unwrap(), -7);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.get_i64().unwrap(), -123_456_789);
        assert_eq!(r.get_f64().unwrap(), 3.5);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = [0u8; 4];
        SafeWriter::new(&mut buf).put_u32(0x0403_0201).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = [0u8; 32];
        {
            let mut w = SafeWriter::new(&mut buf);
            w.put_string("running").unwrap();
            assert_eq!(w.position(), string_size_in_buffer("running"));
        }
        let mut r = SafeReader::new(&buf);
        assert_eq!(r.get_string().unwrap(), "running");
    }

    #[test]
    fn test_overflow_leaves_neighbours_untouched() {
        let mut buf = [0xFFu8; 16];
        {
            // A 4-byte view in the middle of the buffer
            let mut w = SafeWriter::view(&mut buf, 4, 4).unwrap();
            w.put_u16(0).unwrap();
            let err = w.put_u32(0).unwrap_err();
            assert!(matches!(
                err,
                StrataError::SerializationOverflow {
                    needed: 4,
                    available: 2
                }
            ));
            let err = w.put_string("too long").unwrap_err();
            assert!(matches!(err, StrataError::SerializationOverflow { .. }));
        }
        assert_eq!(&buf[0..4], &[0xFF; 4]);
        assert_eq!(&buf[4..6], &[0, 0]);
        assert_eq!(&buf[6..16], &[0xFF; 10]);
    }

    #[test]
    fn test_view_out_of_bounds() {
        let mut buf = [0u8; 8];
        assert!(SafeWriter::view(&mut buf, 4, 8).is_err());
        assert!(SafeWriter::view(&mut buf, usize::MAX, 1).is_err());
        assert!(SafeReader::view(&buf, 6, 4).is_err());
        assert!(SafeReader::view(&buf, 0, 8).is_ok());
    }

    #[test]
    fn test_sub_writer_isolation() {
        let mut buf = [0u8; 12];
        {
            let mut w = SafeWriter::new(&mut buf);
            w.put_u32(1).unwrap();
            {
                let mut sub = w.sub_writer(4).unwrap();
                sub.put_u16(2).unwrap();
                assert!(sub.put_u32(3).is_err());
            }
            // Parent continues after the reserved area
            assert_eq!(w.position(), 8);
            w.put_u32(4).unwrap();
            assert!(w.put_u8(5).is_err());
        }

        let mut r = SafeReader::new(&buf);
        assert_eq!(r.get_u32().unwrap(), 1);
        let mut sub = r.sub_reader(4).unwrap();
        assert_eq!(sub.get_u16().unwrap(), 2);
        assert_eq!(sub.get_u16().unwrap(), 0);
        assert!(sub.get_u8().is_err());
        assert_eq!(r.get_u32().unwrap(), 4);
    }

    #[test]
    fn test_truncated_read() {
        let buf = [1u8, 2, 3];
        let mut r = SafeReader::new(&buf);
        let err = r.get_u32().unwrap_err();
        assert!(matches!(
            err,
            StrataError::Truncated {
                needed: 4,
                available: 3
            }
        ));
        // Failed read does not move the cursor
        assert_eq!(r.position(), 0);
        assert_eq!(r.get_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_length_prefix_past_end() {
        let mut buf = [0u8; 4];
        SafeWriter::new(&mut buf).put_u16(100).unwrap();
        let mut r = SafeReader::new(&buf);
        assert!(matches!(r.get_bytes(), Err(StrataError::Truncated { .. })));
    }

    #[test]
    fn test_put_zeros_and_skip() {
        let mut buf = [0xAAu8; 8];
        {
            let mut w = SafeWriter::new(&mut buf);
            w.put_u8(1).unwrap();
            w.put_zeros(7).unwrap();
            assert_eq!(w.remaining(), 0);
        }
        assert_eq!(buf, [1, 0, 0, 0, 0, 0, 0, 0]);

        let mut r = SafeReader::new(&buf);
        r.skip(7).unwrap();
        assert_eq!(r.get_u8().unwrap(), 0);
        assert!(r.skip(1).is_err());
    }
}
