//! Frame codec for stream transports.
//!
//! A frame is a big-endian `i32` length prefix followed by exactly that
//! many bytes of serialized message. The sign bit of the prefix doubles
//! as the compression flag: a negative value means the body is
//! zlib-compressed and its length is the magnitude.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use wireline_core::compress;
use wireline_core::error::{Result, WirelineError};
use wireline_core::message::{Compression, Message};

/// Hard ceiling on a single frame body. Anything larger is a framing
/// desync or a hostile peer, and either way the stream is unusable.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// When to compress whole frames before they hit the socket.
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    /// zlib level; 0 disables frame compression entirely.
    pub level: i32,
    /// Encoded size a message must exceed to be worth compressing.
    pub threshold: usize,
    /// Local links skip compression: the wire is already memory-speed.
    pub local_link: bool,
}

impl CompressionPolicy {
    fn applies_to(&self, message: &Message, encoded_len: usize) -> bool {
        !self.local_link
            && self.level != 0
            && message.compression() == Compression::None
            && encoded_len > self.threshold
    }
}

/// Serialize a message into one frame, compressing per `policy`.
pub fn encode_frame(message: &Message, policy: &CompressionPolicy) -> Result<Bytes> {
    let body = message.encode();

    let (body, compressed) = if policy.applies_to(message, body.len()) {
        (Bytes::from(compress::deflate(&body, policy.level)?), true)
    } else {
        (body, false)
    };

    if body.len() > MAX_FRAME_LEN {
        return Err(WirelineError::protocol(format!(
            "frame body of {} bytes exceeds the {MAX_FRAME_LEN}-byte limit",
            body.len()
        )));
    }

    let mut out = BytesMut::with_capacity(4 + body.len());
    let prefix = body.len() as i32;
    out.put_i32(if compressed { -prefix } else { prefix });
    out.put_slice(&body);
    Ok(out.freeze())
}

/// One decoded frame; the body is still compressed when flagged.
#[derive(Debug)]
pub struct Frame {
    pub compressed: bool,
    pub body: Bytes,
}

impl Frame {
    /// Undo frame compression and parse the serialized message.
    pub fn into_message(self) -> Result<Message> {
        let body = if self.compressed {
            Bytes::from(compress::inflate(&self.body)?)
        } else {
            self.body
        };
        Message::decode(body)
    }
}

/// Stateful frame decoder.
///
/// Bytes are pushed in as they arrive from the socket; complete frames
/// are pulled out with [`FrameDecoder::next`]. Partial frames stay
/// buffered across calls.
#[derive(Default)]
pub struct FrameDecoder {
    staging: BytesMut,
    // (body length, compressed) once the prefix has been read
    pending: Option<(usize, bool)>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
    }

    /// Number of buffered, not-yet-consumed bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.staging.len()
    }

    /// Decode the next complete frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` — one frame decoded
    /// - `Ok(None)` — need more data
    /// - `Err` — framing violation; the stream cannot be re-synchronized
    pub fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            // === Prefix parsing ===
            let (body_len, compressed) = match self.pending {
                Some(header) => header,
                None => {
                    if self.staging.len() < 4 {
                        return Ok(None);
                    }
                    let raw = {
                        let mut prefix = &self.staging[..4];
                        prefix.get_i32()
                    };
                    self.staging.advance(4);

                    let compressed = raw < 0;
                    let body_len = i64::from(raw).unsigned_abs() as usize;
                    if body_len > MAX_FRAME_LEN {
                        return Err(WirelineError::protocol(format!(
                            "frame prefix announces {body_len} bytes, limit is {MAX_FRAME_LEN}"
                        )));
                    }
                    // An empty frame carries nothing; skip it
                    if body_len == 0 {
                        continue;
                    }
                    self.pending = Some((body_len, compressed));
                    (body_len, compressed)
                }
            };

            // === Body ===
            if self.staging.len() < body_len {
                return Ok(None);
            }
            let body = self.staging.split_to(body_len).freeze();
            self.pending = None;
            return Ok(Some(Frame { compressed, body }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wireline_core::message::MessageKind;

    fn plain_policy() -> CompressionPolicy {
        CompressionPolicy {
            level: -1,
            threshold: 1024,
            local_link: false,
        }
    }

    fn prefix_of(wire: &[u8]) -> i32 {
        let mut prefix = &wire[..4];
        prefix.get_i32()
    }

    fn decode_all(decoder: &mut FrameDecoder, wire: &[u8]) -> Vec<Message> {
        decoder.push(wire);
        let mut out = Vec::new();
        while let Some(frame) = decoder.next().unwrap() {
            out.push(frame.into_message().unwrap());
        }
        out
    }

    #[test]
    fn frame_round_trip_small() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(&b"ping"[..]);

        let wire = encode_frame(&msg, &plain_policy()).unwrap();
        // Small message stays uncompressed: positive prefix
        assert!(prefix_of(&wire) > 0);

        let mut decoder = FrameDecoder::new();
        let out = decode_all(&mut decoder, &wire);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].command(), msg.command());
        assert_eq!(out[0].payload().as_ref(), b"ping");
    }

    #[test]
    fn frame_round_trip_empty_payload() {
        let msg = Message::new(Uuid::new_v4());
        let wire = encode_frame(&msg, &plain_policy()).unwrap();
        let mut decoder = FrameDecoder::new();
        let out = decode_all(&mut decoder, &wire);
        assert_eq!(out.len(), 1);
        assert!(out[0].payload_is_empty());
    }

    #[test]
    fn large_frame_is_compressed() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(b"wireline".repeat(1024));

        let wire = encode_frame(&msg, &plain_policy()).unwrap();
        let prefix = prefix_of(&wire);
        assert!(prefix < 0);
        assert!((prefix.unsigned_abs() as usize) < msg.encoded_len());

        let mut decoder = FrameDecoder::new();
        let out = decode_all(&mut decoder, &wire);
        assert_eq!(out[0].payload().as_ref(), &b"wireline".repeat(1024)[..]);
        // Identical to what the uncompressed path would have produced
        assert_eq!(out[0].command(), msg.command());
        assert_eq!(out[0].kind(), MessageKind::Command);
    }

    #[test]
    fn local_link_skips_compression() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(vec![0u8; 8192]);
        let policy = CompressionPolicy {
            local_link: true,
            ..plain_policy()
        };
        let wire = encode_frame(&msg, &policy).unwrap();
        assert!(prefix_of(&wire) > 0);
    }

    #[test]
    fn disabled_message_skips_compression() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(vec![0u8; 8192]);
        msg.disable_compression();
        let wire = encode_frame(&msg, &plain_policy()).unwrap();
        assert!(prefix_of(&wire) > 0);
    }

    #[test]
    fn level_zero_disables_compression() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(vec![0u8; 8192]);
        let policy = CompressionPolicy {
            level: 0,
            ..plain_policy()
        };
        let wire = encode_frame(&msg, &policy).unwrap();
        assert!(prefix_of(&wire) > 0);
    }

    #[test]
    fn fragmented_delivery_reassembles() {
        let mut msg = Message::new(Uuid::new_v4());
        msg.set_payload(vec![7u8; 300]);
        let wire = encode_frame(&msg, &plain_policy()).unwrap();

        let mut decoder = FrameDecoder::new();
        for chunk in wire.chunks(7) {
            decoder.push(chunk);
        }
        let frame = decoder.next().unwrap().unwrap();
        assert_eq!(frame.into_message().unwrap().payload().len(), 300);
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn back_to_back_frames() {
        let policy = plain_policy();
        let a = Message::new(Uuid::new_v4());
        let b = Message::new(Uuid::new_v4());
        let mut wire = encode_frame(&a, &policy).unwrap().to_vec();
        wire.extend_from_slice(&encode_frame(&b, &policy).unwrap());

        let mut decoder = FrameDecoder::new();
        let out = decode_all(&mut decoder, &wire);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id(), a.id());
        assert_eq!(out[1].id(), b.id());
    }

    #[test]
    fn oversized_prefix_is_fatal() {
        let mut decoder = FrameDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_i32((MAX_FRAME_LEN as i32).saturating_add(1));
        decoder.push(&wire);
        assert!(decoder.next().is_err());
    }

    #[test]
    fn min_prefix_does_not_overflow() {
        let mut decoder = FrameDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_i32(i32::MIN);
        decoder.push(&wire);
        assert!(decoder.next().is_err());
    }

    #[test]
    fn empty_frame_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_i32(0);
        wire.extend_from_slice(&encode_frame(&Message::new(Uuid::new_v4()), &plain_policy()).unwrap());
        decoder.push(&wire);
        assert!(decoder.next().unwrap().is_some());
    }
}
