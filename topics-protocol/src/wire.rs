//! Big-endian field encoding shared by every message payload
//!
//! Strings are written as an `i32` count of UTF-16 code units followed by
//! the units themselves in big-endian order. This is the only text encoding
//! used on the wire.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::CodecError;

/// Builds a message payload field by field
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Write an `i32` length followed by the raw bytes
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.buf.put_slice(bytes);
    }

    /// Write an `i32` code-unit count followed by UTF-16BE units
    pub fn write_string(&mut self, s: &str) {
        let units = s.encode_utf16().count();
        self.buf.reserve(4 + units * 2);
        self.write_i32(units as i32);
        for unit in s.encode_utf16() {
            self.buf.put_u16(unit);
        }
    }

    /// Write an `i32` element count followed by each string
    pub fn write_string_list(&mut self, items: &[String]) {
        self.write_i32(items.len() as i32);
        for item in items {
            self.write_string(item);
        }
    }
}

/// Reads payload fields in order, failing on truncation
///
/// Every failure is reported as [`CodecError::MalformedMessage`] tagged with
/// the message kind being decoded.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    kind: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], kind: &'static str) -> Self {
        Self { buf, pos: 0, kind }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn malformed(&self, reason: impl Into<String>) -> CodecError {
        CodecError::MalformedMessage {
            kind: self.kind,
            reason: reason.into(),
        }
    }

    fn require(&self, n: usize) -> Result<(), CodecError> {
        if n > self.remaining() {
            return Err(self.malformed(format!(
                "truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.require(n)?;
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    /// Read an `i32` count, rejecting negative values
    pub fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| self.malformed(format!("negative count {}", count)))
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let units = self.read_count()?;
        let bytes_len = units
            .checked_mul(2)
            .ok_or_else(|| self.malformed(format!("string length {} overflows", units)))?;
        let raw = self.take(bytes_len)?;

        let decoded: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        String::from_utf16(&decoded).map_err(|e| self.malformed(format!("invalid UTF-16: {}", e)))
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.read_count()?;
        // Each string needs at least its 4-byte prefix
        self.require(count.saturating_mul(4))?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_string()?);
        }
        Ok(items)
    }

    /// Fail if any payload bytes were left unread
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(self.malformed(format!("{} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}
