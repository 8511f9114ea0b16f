//! Outer frame encoding and decoding.
//!
//! Every frame is `0x47, length_hi, length_lo, opcode, body...` where the
//! big-endian length counts the bytes from the opcode onward. Bodies mix
//! big-endian integers, NUL-terminated UTF-8 paths, and a trailing
//! MessagePack value that consumes the rest of the frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Payload, ProtocolError};

/// Leading byte of every frame.
pub const MAGIC: u8 = 0x47;

/// Bytes before the opcode: magic plus the 16-bit length.
pub const HEADER_LEN: usize = 3;

/// Largest body (opcode and onward) the length field can describe.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Incremental frame builder; [`FrameBuilder::finish`] backfills the length.
#[derive(Debug)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    pub fn begin(opcode: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(&[MAGIC, 0, 0, opcode]);
        Self { buf }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a NUL-terminated path.
    ///
    /// # Panics
    ///
    /// Panics if `path` contains an embedded NUL; callers validate paths
    /// before they reach the wire.
    pub fn put_path(&mut self, path: &str) -> &mut Self {
        assert!(
            !path.as_bytes().contains(&0),
            "path contains embedded NUL: {path:?}"
        );
        self.buf.put_slice(path.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Append a MessagePack value. On the wire this must be the last field
    /// of the body; decoding consumes to the end of the frame.
    pub fn put_value(&mut self, payload: &Payload) -> &mut Self {
        let mut bytes = Vec::new();
        payload.write_to(&mut bytes);
        self.buf.put_slice(&bytes);
        self
    }

    pub fn finish(mut self) -> Result<Bytes, ProtocolError> {
        let body_len = self.buf.len() - HEADER_LEN;
        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLong(body_len));
        }
        let len = (body_len as u16).to_be_bytes();
        self.buf[1] = len[0];
        self.buf[2] = len[1];
        Ok(self.buf.freeze())
    }
}

/// Bounds-checked reader over a frame body (opcode already stripped).
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        if self.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let value = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        if self.remaining() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Read up to the next NUL byte and advance past it.
    pub fn read_path(&mut self) -> Result<&'a str, ProtocolError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedPath)?;
        let path = std::str::from_utf8(&rest[..end]).map_err(|_| ProtocolError::InvalidPath)?;
        self.pos += end + 1;
        Ok(path)
    }

    /// Read one MessagePack value; consumes the remainder of the frame.
    pub fn read_value(&mut self) -> Result<Payload, ProtocolError> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        let payload = Payload::read_from(&self.data[self.pos..])?;
        self.pos = self.data.len();
        Ok(payload)
    }

    /// Assert that the whole body has been consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.pos != self.data.len() {
            return Err(ProtocolError::TrailingBytes);
        }
        Ok(())
    }
}
