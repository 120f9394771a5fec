//! # Byte Streams
//!
//! Little-endian writer and reader shared by field encoding, input handlers
//! and the wire format.
//!
//! ## Design
//!
//! - The writer owns a reusable buffer; `take` hands the bytes out and
//!   leaves an empty buffer behind
//! - The reader borrows its input and never allocates except for strings
//! - Every read reports `UnexpectedEnd` instead of panicking

use crate::error::{SyncError, SyncResult};

/// Appends little-endian values to a growable buffer.
#[derive(Debug, Default, Clone)]
pub struct StateWriter {
    buffer: Vec<u8>,
}

impl StateWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Clears written data, keeping the allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing was written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Moves the written bytes out, leaving the writer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Consumes the writer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a bool as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes an i32.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i64.
    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an f32.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes consecutive f32 components.
    #[inline]
    pub fn write_f32s(&mut self, values: &[f32]) {
        for v in values {
            self.write_f32(*v);
        }
    }

    /// Writes raw bytes without a prefix.
    #[inline]
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes bytes prefixed with their length as i32.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.write_raw(bytes);
    }

    /// Writes a UTF-8 string prefixed with its byte length.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Writes a length or count prefix.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_len(&mut self, len: usize) {
        self.write_i32(len as i32);
    }
}

/// Reads little-endian values from a borrowed slice.
#[derive(Debug, Clone)]
pub struct StateReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> StateReader<'a> {
    /// Creates a reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Bytes not yet read.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// True once every byte was consumed.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> SyncResult<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(SyncError::UnexpectedEnd { needed, remaining });
        }
        let slice = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> SyncResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a bool. Any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> SyncResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> SyncResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads an i32.
    pub fn read_i32(&mut self) -> SyncResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads a u32.
    pub fn read_u32(&mut self) -> SyncResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads an i64.
    pub fn read_i64(&mut self) -> SyncResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Reads an f32.
    pub fn read_f32(&mut self) -> SyncResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Reads `N` consecutive f32 components.
    pub fn read_f32s<const N: usize>(&mut self) -> SyncResult<[f32; N]> {
        let mut out = [0.0f32; N];
        for v in &mut out {
            *v = self.read_f32()?;
        }
        Ok(out)
    }

    /// Reads a length or count prefix, rejecting negative values.
    pub fn read_len(&mut self) -> SyncResult<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| SyncError::NegativeLength(len))
    }

    /// Reads length-prefixed bytes, borrowing from the input.
    pub fn read_bytes(&mut self) -> SyncResult<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> SyncResult<String> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| SyncError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_values() {
        let mut writer = StateWriter::new();
        writer.write_bool(true);
        writer.write_i32(-5);
        writer.write_i64(1 << 40);
        writer.write_f32(2.5);
        writer.write_str("héllo");
        assert_eq!(writer.len(), 1 + 4 + 8 + 4 + 4 + 6);

        let bytes = writer.take();
        assert!(writer.is_empty());

        let mut reader = StateReader::new(&bytes);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -5);
        assert_eq!(reader.read_i64().unwrap(), 1 << 40);
        assert_eq!(reader.read_f32().unwrap(), 2.5);
        assert_eq!(reader.read_string().unwrap(), "héllo");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut writer = StateWriter::new();
        writer.write_i32(1);
        assert_eq!(writer.as_slice(), &[1, 0, 0, 0]);
    }

    #[test]
    fn test_short_read_reports_sizes() {
        let mut reader = StateReader::new(&[1, 2]);
        assert_eq!(
            reader.read_i32(),
            Err(SyncError::UnexpectedEnd { needed: 4, remaining: 2 })
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut writer = StateWriter::new();
        writer.write_i32(-3);
        let bytes = writer.into_bytes();
        let mut reader = StateReader::new(&bytes);
        assert_eq!(reader.read_bytes(), Err(SyncError::NegativeLength(-3)));
    }
}
