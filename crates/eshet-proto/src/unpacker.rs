//! Stream unpacker: turns arbitrary byte chunks into whole frame bodies.

use bytes::{Buf, Bytes, BytesMut};

use crate::{HEADER_LEN, MAGIC, ProtocolError};

/// Buffers bytes from the socket and yields one complete frame body
/// (opcode onward, header stripped) at a time.
#[derive(Debug, Default)]
pub struct Unpacker {
    buf: BytesMut,
}

impl Unpacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete frame body, if one is buffered.
    pub fn read(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != MAGIC {
            return Err(ProtocolError::BadMagic(self.buf[0]));
        }
        let len = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let mut frame = self.buf.split_to(HEADER_LEN + len);
        frame.advance(HEADER_LEN);
        Ok(Some(frame.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_across_chunks() {
        let mut unpacker = Unpacker::new();
        unpacker.push(&[0x47, 0x00]);
        assert_eq!(unpacker.read().unwrap(), None);
        unpacker.push(&[0x03, 0x09, 0x12]);
        assert_eq!(unpacker.read().unwrap(), None);
        unpacker.push(&[0x34]);
        assert_eq!(unpacker.read().unwrap().as_deref(), Some(&[0x09, 0x12, 0x34][..]));
        assert_eq!(unpacker.read().unwrap(), None);
    }

    #[test]
    fn yields_back_to_back_frames_in_order() {
        let mut unpacker = Unpacker::new();
        unpacker.push(&[0x47, 0, 1, 0x03, 0x47, 0, 2, 0x09, 0xff]);
        assert_eq!(unpacker.read().unwrap().as_deref(), Some(&[0x03][..]));
        assert_eq!(unpacker.read().unwrap().as_deref(), Some(&[0x09, 0xff][..]));
        assert_eq!(unpacker.read().unwrap(), None);
    }

    #[test]
    fn zero_length_body() {
        let mut unpacker = Unpacker::new();
        unpacker.push(&[0x47, 0, 0]);
        assert_eq!(unpacker.read().unwrap().as_deref(), Some(&[][..]));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut unpacker = Unpacker::new();
        unpacker.push(&[0x48, 0, 0]);
        assert_eq!(unpacker.read(), Err(ProtocolError::BadMagic(0x48)));
    }
}
