use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::channel::validate_channel_name;
use crate::error::{FrameError, Result};

/// Frame header: magic (2) + name length (2) + payload length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "CR" (0x43 0x52).
pub const MAGIC: [u8; 2] = [0x43, 0x52];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One framed message addressed to a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: String,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// The payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| FrameError::InvalidPayload(self.channel.clone()))
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.channel.len() + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌────────────┬─────────────┬─────────────┬──────────────┬───────────┐
/// │ Magic (2B) │ Name length │ Payload len │ Channel name │ Payload   │
/// │ "CR"       │ (2B LE)     │ (4B LE)     │ (UTF-8)      │ (UTF-8)   │
/// └────────────┴─────────────┴─────────────┴──────────────┴───────────┘
/// ```
pub fn encode_frame(channel: &str, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    validate_channel_name(channel)?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    dst.reserve(HEADER_SIZE + channel.len() + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u16_le(channel.len() as u16);
    dst.put_u32_le(payload_len);
    dst.put_slice(channel.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let name_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    let payload_len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + name_len + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let name = src.split_to(name_len);
    let channel = std::str::from_utf8(&name)
        .map_err(|_| FrameError::InvalidChannelName("not UTF-8".to_string()))?
        .to_string();
    validate_channel_name(&channel)?;
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { channel, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = br#"{"id":"abc","type":"req"}"#;

        encode_frame("ctxrpc:rpc:game", payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + "ctxrpc:rpc:game".len() + payload.len());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(frame.channel, "ctxrpc:rpc:game");
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_waits() {
        let mut buf = BytesMut::from(&MAGIC[..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn incomplete_body_waits() {
        let mut buf = BytesMut::new();
        encode_frame("chan", b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 6);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 6, "partial input must not be consumed");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 1, 0, 0, 0, 0, 0, b'x'][..]);
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_payload_is_rejected_from_header_alone() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u16_le(4);
        buf.put_u32_le(64);

        assert!(matches!(
            decode_frame(&mut buf, 32),
            Err(FrameError::PayloadTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn empty_channel_name_is_rejected() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame("", b"x", &mut buf),
            Err(FrameError::InvalidChannelName(_))
        ));

        buf.put_slice(&MAGIC);
        buf.put_u16_le(0);
        buf.put_u32_le(1);
        buf.put_u8(b'x');
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::InvalidChannelName(_))
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        encode_frame("a", b"first", &mut buf).unwrap();
        encode_frame("bb", b"", &mut buf).unwrap();

        let first = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let second = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(first, Frame::new("a", &b"first"[..]));
        assert_eq!(second.channel, "bb");
        assert!(second.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn payload_str_checks_utf8() {
        let good = Frame::new("c", "héllo");
        assert_eq!(good.payload_str().unwrap(), "héllo");
        assert_eq!(good.wire_size(), HEADER_SIZE + 1 + "héllo".len());

        let bad = Frame::new("c", vec![0xff, 0xfe]);
        assert!(matches!(bad.payload_str(), Err(FrameError::InvalidPayload(_))));
    }
}
