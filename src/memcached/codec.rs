// src/memcached/codec.rs

//! The memcached text-protocol framer (C6): a
//! `tokio_util::codec::{Decoder, Encoder}` pair returning `Ok(None)` on
//! an incomplete frame so `Framed` waits for more bytes rather than
//! erroring.

use crate::core::PpdbError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

/// Default command-line cap.
const MAX_COMMAND_LINE: usize = 64 * 1024;
/// Payload cap (separate from the configurable per-value cap enforced
/// later by the KV facade — this is the framing-level ceiling).
const MAX_PAYLOAD: usize = 32 * 1024 * 1024;

const STORAGE_COMMANDS: &[&str] = &["set", "add", "replace", "append", "prepend", "cas"];

/// A single parsed request: the whitespace-split command line, plus the
/// data block for storage commands.
#[derive(Debug, Clone)]
pub struct MemcachedFrame {
    pub tokens: Vec<Bytes>,
    pub payload: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct MemcachedCodec;

impl Decoder for MemcachedCodec {
    type Item = MemcachedFrame;
    type Error = PpdbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(line_end) = find_crlf(src) else {
            if src.len() > MAX_COMMAND_LINE {
                return Err(PpdbError::InvalidData(
                    "command line exceeds maximum length".to_string(),
                ));
            }
            return Ok(None);
        };

        let tokens: Vec<Bytes> = src[..line_end]
            .split(|b| *b == b' ')
            .filter(|t| !t.is_empty())
            .map(|t| Bytes::copy_from_slice(t))
            .collect();

        let command = tokens
            .first()
            .map(|t| String::from_utf8_lossy(t).to_ascii_lowercase())
            .unwrap_or_default();

        if !STORAGE_COMMANDS.contains(&command.as_str()) {
            let consumed = line_end + CRLF_LEN;
            src.advance(consumed);
            return Ok(Some(MemcachedFrame {
                tokens,
                payload: None,
            }));
        }

        let byte_len_token = tokens
            .get(4)
            .ok_or_else(|| PpdbError::InvalidData("missing byte count".to_string()))?;
        let byte_len: usize = std::str::from_utf8(byte_len_token)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PpdbError::InvalidData("malformed byte count".to_string()))?;
        if byte_len > MAX_PAYLOAD {
            return Err(PpdbError::TooLarge);
        }

        let payload_start = line_end + CRLF_LEN;
        let needed = payload_start + byte_len + CRLF_LEN;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        if &src[payload_start + byte_len..needed] != CRLF {
            return Err(PpdbError::InvalidData(
                "payload not terminated by CRLF".to_string(),
            ));
        }

        let payload = Bytes::copy_from_slice(&src[payload_start..payload_start + byte_len]);
        src.advance(needed);
        Ok(Some(MemcachedFrame {
            tokens,
            payload: Some(payload),
        }))
    }
}

impl Encoder<Bytes> for MemcachedCodec {
    type Error = PpdbError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_line_command() {
        let mut codec = MemcachedCodec;
        let mut buf = BytesMut::from(&b"get foo\r\n"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tokens, vec![Bytes::from("get"), Bytes::from("foo")]);
        assert!(frame.payload.is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_incomplete_storage_payload() {
        let mut codec = MemcachedCodec;
        let mut buf = BytesMut::from(&b"set foo 0 0 5\r\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\r\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.unwrap(), Bytes::from("hello"));
    }

    #[test]
    fn rejects_payload_missing_trailing_crlf() {
        let mut codec = MemcachedCodec;
        let mut buf = BytesMut::from(&b"set foo 0 0 5\r\nhelloXX"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
