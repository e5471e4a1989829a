//! Big-endian primitive wire encoding shared by every MNX section codec
//! (§6).

use uuid::Uuid;

use crate::error::MnxError;

/// Append-only big-endian byte writer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Construct an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Current length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the accumulated bytes without consuming the writer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write raw bytes verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a signed byte.
    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    /// Write a big-endian `i16`.
    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `f32`.
    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `f64`.
    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a single byte, `1` for `true` and `0` for `false`.
    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    /// Write `i32` length-prefixed UTF-8 bytes.
    pub fn write_string(&mut self, v: &str) {
        self.write_i32(v.len() as i32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// Write a length-prefixed byte blob.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_i32(v.len() as i32);
        self.buf.extend_from_slice(v);
    }

    /// Write 16 raw UUID bytes.
    pub fn write_uuid(&mut self, v: Uuid) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// Write an `i32` count followed by each element, written by `write_elem`.
    pub fn write_list<T>(&mut self, items: &[T], mut write_elem: impl FnMut(&mut Self, &T)) {
        self.write_i32(items.len() as i32);
        for item in items {
            write_elem(self, item);
        }
    }
}

/// Cursor-based big-endian byte reader. Every read returns
/// [`MnxError::TruncatedInput`] if fewer bytes remain than required.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Construct a reader over `buf`, starting at offset 0.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MnxError> {
        if self.remaining() < n {
            return Err(MnxError::TruncatedInput { expected: n, found: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read `n` raw bytes.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], MnxError> {
        self.take(n)
    }

    /// Read an unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8, MnxError> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8, MnxError> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Read a big-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, MnxError> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, MnxError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, MnxError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, MnxError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, MnxError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, MnxError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a big-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, MnxError> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Read a big-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64, MnxError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a single byte as a bool (nonzero is `true`).
    pub fn read_bool(&mut self) -> Result<bool, MnxError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read an `i32` length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, MnxError> {
        let len = self.read_i32()?.max(0) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| MnxError::SectionPayloadCorrupt {
            section: -1,
            reason: e.to_string(),
        })
    }

    /// Read a length-prefixed byte blob.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, MnxError> {
        let len = self.read_i32()?.max(0) as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read 16 raw bytes as a UUID.
    pub fn read_uuid(&mut self) -> Result<Uuid, MnxError> {
        let bytes = self.take(16)?;
        Ok(Uuid::from_slice(bytes).expect("exactly 16 bytes read"))
    }

    /// Read an `i32` count followed by `count` elements via `read_elem`.
    pub fn read_list<T>(&mut self, mut read_elem: impl FnMut(&mut Self) -> Result<T, MnxError>) -> Result<Vec<T>, MnxError> {
        let count = self.read_i32()?.max(0) as usize;
        let mut items = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            items.push(read_elem(self)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrips() {
        let mut w = ByteWriter::new();
        w.write_string("hello mnx");
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "hello mnx");
    }

    #[test]
    fn list_roundtrips() {
        let mut w = ByteWriter::new();
        w.write_list(&[1i32, 2, 3], |w, v| w.write_i32(*v));
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let items = r.read_list(|r| r.read_i32()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = [0u8; 2];
        let mut r = ByteReader::new(&bytes);
        let err = r.read_i64().unwrap_err();
        assert!(matches!(err, MnxError::TruncatedInput { expected: 8, found: 2 }));
    }

    #[test]
    fn uuid_roundtrips() {
        let id = Uuid::new_v4();
        let mut w = ByteWriter::new();
        w.write_uuid(id);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_uuid().unwrap(), id);
    }
}
