// Bounds-checked little-endian reader over a borrowed byte buffer.

use crate::error::GgufError;

/// Hard cap on a single GGUF string (key, name or string value).
pub const MAX_STRING_LEN: u64 = 1 << 20;

/// Sequential reader over an immutable byte slice.
///
/// Every read advances the offset and fails with [`GgufError::OutOfBounds`]
/// instead of reading past the end. The buffer is never copied.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the read offset and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the next `n` bytes as a sub-slice of the buffer.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], GgufError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(GgufError::OutOfBounds {
                offset: self.pos,
                needed: n,
                len: self.buf.len(),
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], GgufError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, GgufError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, GgufError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, GgufError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, GgufError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, GgufError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, GgufError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, GgufError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, GgufError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, GgufError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, GgufError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// GGUF bools are a single byte; any nonzero value is true.
    pub fn read_bool(&mut self) -> Result<bool, GgufError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a GGUF string capped at [`MAX_STRING_LEN`] bytes.
    pub fn read_string(&mut self) -> Result<String, GgufError> {
        self.read_string_capped(MAX_STRING_LEN)
    }

    /// Read a GGUF string: u64 length prefix + raw UTF-8 bytes (no terminator).
    ///
    /// The cap is checked before the bounds check, so a huge declared length
    /// is reported as oversized rather than truncated.
    pub fn read_string_capped(&mut self, max_len: u64) -> Result<String, GgufError> {
        let len = self.read_u64()?;
        if len > max_len {
            return Err(GgufError::OversizedString { len, max: max_len });
        }
        let start = self.pos;
        let bytes = self.take(len as usize)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| GgufError::InvalidUtf8 { offset: start })
    }

    /// Advance to the next multiple of `boundary`. No-op when already aligned.
    ///
    /// Landing exactly on the end of the buffer is allowed; beyond it is not.
    pub fn align(&mut self, boundary: usize) -> Result<usize, GgufError> {
        if boundary == 0 {
            return Err(GgufError::Malformed("alignment boundary of 0".to_string()));
        }
        let aligned = self
            .pos
            .checked_next_multiple_of(boundary)
            .ok_or_else(|| GgufError::Malformed(format!("offset {} overflows alignment", self.pos)))?;
        if aligned > self.buf.len() {
            return Err(GgufError::OutOfBounds {
                offset: self.pos,
                needed: aligned - self.pos,
                len: self.buf.len(),
            });
        }
        self.pos = aligned;
        Ok(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32() {
        let data = [0x47, 0x47, 0x55, 0x46]; // GGUF magic LE
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.read_u32().unwrap(), 0x4655_4747);
        assert_eq!(cur.position(), 4);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_read_all_scalars_in_sequence() {
        let mut data = Vec::new();
        data.push(0xFFu8);
        data.push(0x80u8);
        data.extend_from_slice(&0xABCDu16.to_le_bytes());
        data.extend_from_slice(&(-1234i16).to_le_bytes());
        data.extend_from_slice(&(-1i32).to_le_bytes());
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&(-99i64).to_le_bytes());
        data.extend_from_slice(&3.5f32.to_le_bytes());
        data.extend_from_slice(&2.718281828459045f64.to_le_bytes());

        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.read_u8().unwrap(), 255);
        assert_eq!(cur.read_i8().unwrap(), -128);
        assert_eq!(cur.read_u16().unwrap(), 0xABCD);
        assert_eq!(cur.read_i16().unwrap(), -1234);
        assert_eq!(cur.read_i32().unwrap(), -1);
        assert_eq!(cur.read_u64().unwrap(), 42);
        assert_eq!(cur.read_i64().unwrap(), -99);
        assert_eq!(cur.read_f32().unwrap(), 3.5);
        assert_eq!(cur.read_f64().unwrap(), 2.718281828459045);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_read_bool_nonzero_is_true() {
        let data = [0u8, 1, 42];
        let mut cur = ByteCursor::new(&data);
        assert!(!cur.read_bool().unwrap());
        assert!(cur.read_bool().unwrap());
        assert!(cur.read_bool().unwrap());
    }

    #[test]
    fn test_truncated_read_is_out_of_bounds() {
        let data = [0u8; 3];
        let mut cur = ByteCursor::new(&data);
        match cur.read_u32() {
            Err(GgufError::OutOfBounds { offset, needed, len }) => {
                assert_eq!((offset, needed, len), (0, 4, 3));
            }
            other => panic!("expected OutOfBounds, got {:?}", other),
        }
        // Failed reads do not advance.
        assert_eq!(cur.position(), 0);
        assert_eq!(cur.read_u16().unwrap(), 0);
        assert!(cur.read_u16().is_err());
    }

    #[test]
    fn test_read_string() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u64.to_le_bytes());
        data.extend_from_slice(b"hello");
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_read_string_empty() {
        let data = 0u64.to_le_bytes();
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.read_string().unwrap(), "");
    }

    #[test]
    fn test_read_string_oversized() {
        let data = 2_000_000u64.to_le_bytes();
        let mut cur = ByteCursor::new(&data);
        match cur.read_string() {
            Err(GgufError::OversizedString { len, max }) => {
                assert_eq!(len, 2_000_000);
                assert_eq!(max, MAX_STRING_LEN);
            }
            other => panic!("expected OversizedString, got {:?}", other),
        }
    }

    #[test]
    fn test_read_string_truncated() {
        let mut data = Vec::new();
        data.extend_from_slice(&10u64.to_le_bytes());
        data.extend_from_slice(b"abc");
        let mut cur = ByteCursor::new(&data);
        assert!(matches!(
            cur.read_string(),
            Err(GgufError::OutOfBounds { offset: 8, needed: 10, .. })
        ));
    }

    #[test]
    fn test_read_string_invalid_utf8() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u64.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFE, 0xFD]);
        let mut cur = ByteCursor::new(&data);
        assert!(matches!(
            cur.read_string(),
            Err(GgufError::InvalidUtf8 { offset: 8 })
        ));
    }

    #[test]
    fn test_align() {
        let data = [0u8; 96];
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.align(32).unwrap(), 0);
        cur.take(1).unwrap();
        assert_eq!(cur.align(32).unwrap(), 32);
        assert_eq!(cur.align(32).unwrap(), 32);
        cur.take(33).unwrap();
        assert_eq!(cur.align(32).unwrap(), 96);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_align_past_end_fails() {
        let data = [0u8; 40];
        let mut cur = ByteCursor::new(&data);
        cur.take(33).unwrap();
        assert!(matches!(cur.align(32), Err(GgufError::OutOfBounds { .. })));
        assert_eq!(cur.position(), 33);
    }

    #[test]
    fn test_align_zero_boundary_rejected() {
        let data = [0u8; 4];
        let mut cur = ByteCursor::new(&data);
        assert!(matches!(cur.align(0), Err(GgufError::Malformed(_))));
    }
}
