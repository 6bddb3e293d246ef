/// Wire protocol framing and codec
///
/// The cluster speaks a word-oriented binary protocol. A connection starts
/// with an 8-byte version preamble, then carries framed messages in both
/// directions: an 8-byte header (body length in 8-byte words, message kind,
/// schema version, reserved extra) followed by the body. All scalars are
/// little-endian; strings are NUL-terminated and zero-padded to the next
/// word boundary.
pub mod message;
pub mod value;

pub use message::{Request, Response};
pub use value::Value;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// Protocol version sent as the connection preamble
pub const PROTOCOL_VERSION: u64 = 1;

/// Size of one protocol word in bytes
pub const WORD: usize = 8;

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Largest frame body accepted before the decoder gives up
pub const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// Wire format violations
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Invalid wire format: {0}")]
    InvalidFormat(String),

    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),

    #[error("Unknown request kind: {0}")]
    UnknownRequestKind(u8),

    #[error("Unknown response kind: {0}")]
    UnknownResponseKind(u8),

    #[error("Unknown value tag: {0}")]
    UnknownValueTag(u8),

    #[error("Frame body of {words} words exceeds the {MAX_BODY_LEN} byte limit")]
    Oversize { words: u32 },
}

/// Frame header: body length in words, message kind, schema, reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub words: u32,
    pub kind: u8,
    pub schema: u8,
    pub extra: u16,
}

/// A complete frame as read off the wire
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    /// Build a frame around an already word-aligned body
    pub fn new(kind: u8, body: Bytes) -> Self {
        debug_assert!(body.len() % WORD == 0, "frame body must be word aligned");
        Self {
            header: FrameHeader {
                words: (body.len() / WORD) as u32,
                kind,
                schema: 0,
                extra: 0,
            },
            body,
        }
    }

    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    /// Append the full frame (header and body) to a buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.header.words);
        buf.put_u8(self.header.kind);
        buf.put_u8(self.header.schema);
        buf.put_u16_le(self.header.extra);
        buf.extend_from_slice(&self.body);
    }
}

/// Incremental frame decoder
///
/// Raw bytes go in through `feed`; complete frames come out of `try_frame`.
/// `Ok(None)` means the buffer does not yet hold a full frame and the caller
/// should read more from the socket.
#[derive(Debug, Default)]
pub struct DecodeBuffer {
    buf: BytesMut,
}

impl DecodeBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append raw bytes from the socket
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode one complete frame from the buffered bytes
    pub fn try_frame(&mut self) -> Result<Option<Frame>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let words = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let body_len = words as usize * WORD;
        if body_len > MAX_BODY_LEN {
            return Err(WireError::Oversize { words });
        }

        if self.buf.len() < HEADER_LEN + body_len {
            return Ok(None);
        }

        let head = self.buf.split_to(HEADER_LEN);
        let header = FrameHeader {
            words,
            kind: head[4],
            schema: head[5],
            extra: u16::from_le_bytes([head[6], head[7]]),
        };
        let body = self.buf.split_to(body_len).freeze();

        Ok(Some(Frame { header, body }))
    }

    /// True if undecoded bytes remain in the buffer
    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Append a NUL-terminated string padded to the next word boundary
///
/// Assumes the buffer is word-aligned at the point of the call, which holds
/// because every wire field occupies a whole number of words.
pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.put_u8(0);
    while buf.len() % WORD != 0 {
        buf.put_u8(0);
    }
}

/// Consume a NUL-terminated word-padded string from a body cursor
pub(crate) fn get_string(buf: &mut Bytes) -> Result<String, WireError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::InvalidFormat("unterminated string".to_string()))?;
    let padded = (nul + WORD) / WORD * WORD;
    if buf.len() < padded {
        return Err(WireError::InvalidFormat(
            "string padding past end of body".to_string(),
        ));
    }
    let raw = buf.split_to(padded);
    Ok(str::from_utf8(&raw[..nul])?.to_string())
}

/// Consume one little-endian u64 word from a body cursor
pub(crate) fn get_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    if buf.remaining() < WORD {
        return Err(WireError::InvalidFormat(
            "body truncated inside a word".to_string(),
        ));
    }
    Ok(buf.get_u64_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut body = BytesMut::new();
        body.put_u64_le(42);
        let frame = Frame::new(3, body.freeze());

        let mut encoded = BytesMut::new();
        frame.encode_into(&mut encoded);
        assert_eq!(encoded.len(), HEADER_LEN + WORD);

        let mut decoder = DecodeBuffer::new();
        decoder.feed(&encoded);
        let decoded = decoder.try_frame().unwrap().unwrap();

        assert_eq!(decoded.header, frame.header);
        assert_eq!(decoded.body, frame.body);
        assert!(!decoder.has_buffered());
    }

    #[test]
    fn test_incomplete_frame_returns_none() {
        let mut body = BytesMut::new();
        body.put_u64_le(1);
        body.put_u64_le(2);
        let frame = Frame::new(7, body.freeze());

        let mut encoded = BytesMut::new();
        frame.encode_into(&mut encoded);

        // Feed one byte at a time; the frame appears only on the last byte
        let mut decoder = DecodeBuffer::new();
        for (i, byte) in encoded.iter().enumerate() {
            decoder.feed(&[*byte]);
            let result = decoder.try_frame().unwrap();
            if i < encoded.len() - 1 {
                assert!(result.is_none(), "frame decoded early at byte {}", i);
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn test_two_frames_in_one_feed() {
        let first = Frame::new(1, Bytes::from_static(&[0u8; 8]));
        let second = Frame::new(2, Bytes::from_static(&[1u8; 16]));

        let mut encoded = BytesMut::new();
        first.encode_into(&mut encoded);
        second.encode_into(&mut encoded);

        let mut decoder = DecodeBuffer::new();
        decoder.feed(&encoded);

        assert_eq!(decoder.try_frame().unwrap().unwrap().kind(), 1);
        assert_eq!(decoder.try_frame().unwrap().unwrap().kind(), 2);
        assert!(decoder.try_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut decoder = DecodeBuffer::new();
        let words = (MAX_BODY_LEN / WORD + 1) as u32;
        let mut header = Vec::new();
        header.extend_from_slice(&words.to_le_bytes());
        header.extend_from_slice(&[0, 0, 0, 0]);
        decoder.feed(&header);

        assert!(matches!(
            decoder.try_frame(),
            Err(WireError::Oversize { .. })
        ));
    }

    #[test]
    fn test_string_padding_roundtrip() {
        for text in ["", "a", "1234567", "12345678", "database.db"] {
            let mut buf = BytesMut::new();
            put_string(&mut buf, text);
            assert_eq!(buf.len() % WORD, 0, "padding broken for {:?}", text);

            let mut cursor = buf.freeze();
            assert_eq!(get_string(&mut cursor).unwrap(), text);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_unterminated_string_rejected() {
        let mut cursor = Bytes::from_static(&[b'a', b'b', b'c']);
        assert!(matches!(
            get_string(&mut cursor),
            Err(WireError::InvalidFormat(_))
        ));
    }
}
