//! Framing for multipart messages over byte streams.
//!
//! Each frame is written as:
//!
//! ```text
//! +-------+----------------------+-----------+
//! | flags | size (1 or 8 bytes)  | payload   |
//! +-------+----------------------+-----------+
//! ```
//!
//! - `flags & MORE`: another frame of the same message follows.
//! - `flags & LONG`: the size is a big-endian `u64` instead of a single byte.
//!
//! Any other flag bit is a protocol error.

use crate::{Error, Message};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const MORE: u8 = 0x01;
pub const LONG: u8 = 0x02;

/// Largest payload that fits the one-byte size field.
const SHORT_MAX: usize = u8::MAX as usize;

/// Default upper bound for a single frame's payload (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Upper bound for the number of frames in one message. Together with the
/// frame limit this caps what a peer can make us buffer before its final
/// frame arrives.
pub const MAX_FRAMES: usize = 64;

#[derive(Debug)]
pub struct MultipartCodec {
    max_frame_len: usize,
    partial: Message,
}

impl MultipartCodec {
    pub const fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            partial: Message::new(),
        }
    }
}

fn too_many_frames() -> Error {
    Error::Codec {
        reason: format!("message exceeds limit of {MAX_FRAMES} frames"),
    }
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for MultipartCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        loop {
            let Some(&flags) = src.first() else {
                return Ok(None);
            };
            if flags & !(MORE | LONG) != 0 {
                return Err(Error::Codec {
                    reason: format!("unknown frame flags {flags:#04x}"),
                });
            }

            let (header_len, frame_len) = if flags & LONG != 0 {
                if src.len() < 9 {
                    return Ok(None);
                }
                let mut size = [0_u8; 8];
                size.copy_from_slice(&src[1..9]);
                let size = u64::from_be_bytes(size);
                (9, usize::try_from(size).unwrap_or(usize::MAX))
            } else {
                if src.len() < 2 {
                    return Ok(None);
                }
                (2, usize::from(src[1]))
            };

            if frame_len > self.max_frame_len {
                return Err(Error::Codec {
                    reason: format!(
                        "frame of {frame_len} bytes exceeds limit of {}",
                        self.max_frame_len
                    ),
                });
            }

            if self.partial.len() >= MAX_FRAMES {
                self.partial = Message::new();
                return Err(too_many_frames());
            }

            let total = header_len + frame_len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            src.advance(header_len);
            let frame = src.split_to(frame_len).freeze();
            self.partial.push_back(frame);

            if flags & MORE == 0 {
                return Ok(Some(core::mem::take(&mut self.partial)));
            }
        }
    }
}

impl Encoder<Message> for MultipartCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Error> {
        if msg.is_empty() {
            return Err(Error::Codec {
                reason: "cannot encode an empty message".to_string(),
            });
        }
        if msg.len() > MAX_FRAMES {
            return Err(too_many_frames());
        }

        let last = msg.len() - 1;
        dst.reserve(msg.byte_len() + msg.len() * 9);
        for (i, frame) in msg.into_iter().enumerate() {
            if frame.len() > self.max_frame_len {
                return Err(Error::Codec {
                    reason: format!(
                        "frame of {} bytes exceeds limit of {}",
                        frame.len(),
                        self.max_frame_len
                    ),
                });
            }
            let more = if i < last { MORE } else { 0 };
            if frame.len() > SHORT_MAX {
                dst.put_u8(more | LONG);
                dst.put_u64(frame.len() as u64);
            } else {
                dst.put_u8(more);
                dst.put_u8(frame.len() as u8);
            }
            dst.extend_from_slice(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(msg: Message) -> BytesMut {
        let mut buf = BytesMut::new();
        MultipartCodec::default().encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn short_frames_layout() {
        let buf = encode(Message::from_strs(["", "HELLO"]));
        assert_eq!(&buf[..], b"\x01\x00\x00\x05HELLO");
    }

    #[test]
    fn long_frame_uses_eight_byte_size() {
        let payload = Bytes::from(vec![7_u8; 300]);
        let buf = encode(Message::from(vec![payload.clone()]));
        assert_eq!(buf[0], LONG);
        assert_eq!(&buf[1..9], &300_u64.to_be_bytes());
        assert_eq!(buf.len(), 9 + 300);

        let mut codec = MultipartCodec::default();
        let mut src = buf;
        let msg = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(msg.first().unwrap(), &payload);
    }

    #[test]
    fn waits_for_the_last_frame() {
        let full = encode(Message::from_strs(["w1", "", "OK"]));
        let mut codec = MultipartCodec::default();
        let mut src = BytesMut::new();

        // Feed one byte at a time: nothing comes out until the final byte.
        for (i, byte) in full.iter().enumerate() {
            src.put_u8(*byte);
            let decoded = codec.decode(&mut src).unwrap();
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(decoded.unwrap(), Message::from_strs(["w1", "", "OK"]));
            }
        }
        assert!(src.is_empty());
    }

    #[test]
    fn decodes_back_to_back_messages() {
        let mut src = encode(Message::from_strs(["a"]));
        src.extend_from_slice(&encode(Message::from_strs(["b", "c"])));
        let mut codec = MultipartCodec::default();
        assert_eq!(
            codec.decode(&mut src).unwrap().unwrap(),
            Message::from_strs(["a"])
        );
        assert_eq!(
            codec.decode(&mut src).unwrap().unwrap(),
            Message::from_strs(["b", "c"])
        );
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut src = BytesMut::from(&b"\x04\x00"[..]);
        let err = MultipartCodec::default().decode(&mut src).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn rejects_oversized_frames_from_the_header_alone() {
        let mut codec = MultipartCodec::new(16);
        let mut src = BytesMut::new();
        src.put_u8(LONG);
        src.put_u64(1 << 40);
        assert!(matches!(codec.decode(&mut src), Err(Error::Codec { .. })));

        let mut buf = BytesMut::new();
        let err = codec
            .encode(Message::from(vec![Bytes::from(vec![0_u8; 17])]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn caps_frames_per_message() {
        let mut codec = MultipartCodec::default();
        let mut src = BytesMut::new();
        for _ in 0..MAX_FRAMES {
            src.put_u8(MORE);
            src.put_u8(0);
        }
        // A full message's worth of frames, all announcing more to come.
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());

        src.put_u8(MORE);
        src.put_u8(0);
        assert!(matches!(codec.decode(&mut src), Err(Error::Codec { .. })));

        let at_limit = Message::from(vec![Bytes::new(); MAX_FRAMES]);
        let mut buf = BytesMut::new();
        codec.encode(at_limit, &mut buf).unwrap();
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().len(),
            MAX_FRAMES
        );

        let over = Message::from(vec![Bytes::new(); MAX_FRAMES + 1]);
        assert!(matches!(
            codec.encode(over, &mut BytesMut::new()),
            Err(Error::Codec { .. })
        ));
    }

    #[test]
    fn refuses_empty_messages() {
        let mut buf = BytesMut::new();
        assert!(
            MultipartCodec::default()
                .encode(Message::new(), &mut buf)
                .is_err()
        );
    }
}
