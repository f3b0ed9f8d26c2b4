//! Message value object exchanged between peers.
//!
//! A message is a discrete, typed, prioritized unit of traffic. The wire
//! form is a fixed header (identity, command, version window, packed flags)
//! followed by optional fields that are elided when empty, so a bare
//! command costs 40 bytes on the wire.
//!
//! Messages are shared via `Arc` once they enter a queue or cross a task
//! boundary; all mutation happens before that point.

use crate::compress;
use crate::error::{Result, WirelineError};
use crate::version::{PROTOCOL_VERSION_HIGH, PROTOCOL_VERSION_LOW};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use std::net::SocketAddr;
use uuid::Uuid;

/// Numeric identity of one accepted stream connection.
///
/// `-1` means "not associated with a connection".
pub type Descriptor = i64;

/// Kind of a transferred message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A command to execute or a request for data. An `Answer` with the
    /// same id is expected in return.
    Command = 0,
    /// The response to a `Command`, carrying an [`ExecStatus`].
    Answer = 1,
    /// Like `Command`, but fire-and-forget; used for broadcast
    /// notifications and never answered.
    Event = 2,
}

/// Execution status carried by `Answer` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Unknown = 0,
    /// The command was processed and the answer carries valid data.
    Success = 1,
    /// The command was not carried out, but the outcome is not an error
    /// (e.g. insufficient rights); the payload is a [`FailureInfo`].
    ///
    /// [`FailureInfo`]: crate::data::FailureInfo
    Failed = 2,
    /// Processing raised an error; the payload is an [`ErrorInfo`].
    ///
    /// [`ErrorInfo`]: crate::data::ErrorInfo
    Error = 3,
}

/// Outbound scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// Compression state of the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Payload is uncompressed; the transport may still compress the
    /// whole frame opportunistically.
    None = 0,
    /// Payload is zlib-compressed.
    Zip = 1,
    /// Payload must never be compressed, not even by the transport.
    /// Useful for content that is already packed (images, archives).
    Disable = 2,
}

/// Serialization format of the payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Binary = 0,
    Json = 1,
}

/// Transport a message was received from (or is destined for).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    Unknown = 0,
    /// TCP stream socket
    Stream = 1,
    /// Unix-domain stream socket
    Local = 2,
    /// UDP datagram socket
    Datagram = 3,
}

// Flag word layout (low to high):
//   kind:3  exec_status:3  priority:2  compression:3  content_format:3
//   tag_present:1  payload_present:1
const KIND_SHIFT: u32 = 0;
const STATUS_SHIFT: u32 = 3;
const PRIORITY_SHIFT: u32 = 6;
const COMPRESSION_SHIFT: u32 = 8;
const FORMAT_SHIFT: u32 = 11;
const TAG_PRESENT: u32 = 1 << 14;
const PAYLOAD_PRESENT: u32 = 1 << 15;

/// A discrete, typed, prioritized message.
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    command: Uuid,
    protocol_version_low: u16,
    protocol_version_high: u16,
    kind: MessageKind,
    exec_status: ExecStatus,
    priority: Priority,
    compression: Compression,
    content_format: ContentFormat,
    tag: u64,
    payload: Bytes,

    // Transport bookkeeping; never serialized.
    transport: TransportKind,
    descriptor: Descriptor,
    source_addr: Option<SocketAddr>,
    peer_name: Option<String>,
    dest_descriptors: SmallVec<[Descriptor; 4]>,
    dest_addrs: SmallVec<[SocketAddr; 4]>,
}

impl Message {
    /// Create a new `Command` message for the given command id.
    #[must_use]
    pub fn new(command: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            protocol_version_low: PROTOCOL_VERSION_LOW,
            protocol_version_high: PROTOCOL_VERSION_HIGH,
            kind: MessageKind::Command,
            exec_status: ExecStatus::Unknown,
            priority: Priority::Normal,
            compression: Compression::None,
            content_format: ContentFormat::Binary,
            tag: 0,
            payload: Bytes::new(),
            transport: TransportKind::Unknown,
            descriptor: -1,
            source_addr: None,
            peer_name: None,
            dest_descriptors: SmallVec::new(),
            dest_addrs: SmallVec::new(),
        }
    }

    /// Create a new `Event` message for the given command id.
    #[must_use]
    pub fn event(command: Uuid) -> Self {
        let mut m = Self::new(command);
        m.kind = MessageKind::Event;
        m
    }

    /// Build the reply to this message.
    ///
    /// The answer keeps the id and command (that pairing is how the caller
    /// correlates request and response) and the source/descriptor fields
    /// (so routing it back is a no-op for the caller), while the payload,
    /// destinations and compression are reset and the kind becomes
    /// `Answer` with `ExecStatus::Success`.
    #[must_use]
    pub fn answer(&self) -> Self {
        Self {
            id: self.id,
            command: self.command,
            protocol_version_low: PROTOCOL_VERSION_LOW,
            protocol_version_high: PROTOCOL_VERSION_HIGH,
            kind: MessageKind::Answer,
            exec_status: ExecStatus::Success,
            priority: self.priority,
            compression: Compression::None,
            content_format: ContentFormat::Binary,
            tag: self.tag,
            payload: Bytes::new(),
            transport: self.transport,
            descriptor: self.descriptor,
            source_addr: self.source_addr,
            peer_name: self.peer_name.clone(),
            dest_descriptors: SmallVec::new(),
            dest_addrs: SmallVec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> Uuid {
        self.command
    }

    /// Version window declared by the sender of this message.
    pub fn protocol_versions(&self) -> (u16, u16) {
        (self.protocol_version_low, self.protocol_version_high)
    }

    /// Override the advertised version window.
    ///
    /// Messages are created with this build's window; a relay forwarding
    /// traffic from another node keeps the original sender's window
    /// instead.
    pub fn set_protocol_versions(&mut self, low: u16, high: u16) {
        self.protocol_version_low = low;
        self.protocol_version_high = high;
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: MessageKind) {
        self.kind = kind;
    }

    pub fn exec_status(&self) -> ExecStatus {
        self.exec_status
    }

    pub fn set_exec_status(&mut self, status: ExecStatus) {
        self.exec_status = status;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn content_format(&self) -> ContentFormat {
        self.content_format
    }

    /// Caller-owned correlation value carried outside the payload.
    /// Zero means unset and is elided from the wire.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    /// Raw payload bytes, possibly compressed.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Replace the payload with raw binary content.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.content_format = ContentFormat::Binary;
    }

    pub fn clear_payload(&mut self) {
        self.payload = Bytes::new();
        self.compression = Compression::None;
    }

    /// Payload bytes with compression undone, without mutating the message.
    pub fn content(&self) -> Result<Bytes> {
        match self.compression {
            Compression::Zip => Ok(Bytes::from(compress::inflate(&self.payload)?)),
            _ => Ok(self.payload.clone()),
        }
    }

    /// Compress the payload in place with zlib.
    ///
    /// A no-op when the payload is empty, already compressed, or marked
    /// `Compression::Disable`.
    pub fn compress(&mut self, level: i32) -> Result<()> {
        if self.compression == Compression::None && !self.payload.is_empty() {
            let packed = compress::deflate(&self.payload, level)?;
            self.payload = Bytes::from(packed);
            self.compression = Compression::Zip;
        }
        Ok(())
    }

    /// Undo payload compression in place.
    pub fn decompress(&mut self) -> Result<()> {
        if self.compression == Compression::Zip {
            self.payload = Bytes::from(compress::inflate(&self.payload)?);
            self.compression = Compression::None;
        }
        Ok(())
    }

    /// Forbid compression of this message at any level, including the
    /// opportunistic whole-frame compression in the transport.
    pub fn disable_compression(&mut self) {
        if self.compression == Compression::None {
            self.compression = Compression::Disable;
        }
    }

    #[cfg(feature = "json")]
    /// Serialize `value` as JSON into the payload.
    pub fn write_json_content<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        let json =
            serde_json::to_vec(value).map_err(|e| WirelineError::malformed(e.to_string()))?;
        self.payload = Bytes::from(json);
        self.content_format = ContentFormat::Json;
        Ok(())
    }

    #[cfg(feature = "json")]
    /// Deserialize the payload as JSON.
    pub fn read_json_content<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let content = self.content()?;
        serde_json::from_slice(&content).map_err(|e| WirelineError::malformed(e.to_string()))
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Set by the transport layer on receipt.
    pub fn set_transport(&mut self, transport: TransportKind) {
        self.transport = transport;
    }

    /// Descriptor of the stream connection this message arrived on.
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    /// Set by the transport layer on receipt.
    pub fn set_descriptor(&mut self, descriptor: Descriptor) {
        self.descriptor = descriptor;
    }

    /// Address the datagram/stream peer sent from, when known.
    pub fn source_addr(&self) -> Option<SocketAddr> {
        self.source_addr
    }

    /// Set by the transport layer on receipt.
    pub fn set_source_addr(&mut self, addr: SocketAddr) {
        self.source_addr = Some(addr);
    }

    /// Name of the Unix-domain endpoint this message arrived on.
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Set by the transport layer on receipt.
    pub fn set_peer_name(&mut self, name: impl Into<String>) {
        self.peer_name = Some(name.into());
    }

    /// Stream connections this message should be routed to. When empty,
    /// the listener falls back to [`Message::descriptor`].
    pub fn destination_descriptors(&self) -> &[Descriptor] {
        &self.dest_descriptors
    }

    pub fn add_destination_descriptor(&mut self, descriptor: Descriptor) {
        if !self.dest_descriptors.contains(&descriptor) {
            self.dest_descriptors.push(descriptor);
        }
    }

    /// Datagram addresses this message should be sent to. When empty, the
    /// datagram endpoint falls back to [`Message::source_addr`].
    pub fn destination_addrs(&self) -> &[SocketAddr] {
        &self.dest_addrs
    }

    pub fn add_destination_addr(&mut self, addr: SocketAddr) {
        if !self.dest_addrs.contains(&addr) {
            self.dest_addrs.push(addr);
        }
    }

    fn pack_flags(&self) -> u32 {
        let mut flags = (self.kind as u32) << KIND_SHIFT
            | (self.exec_status as u32) << STATUS_SHIFT
            | (self.priority as u32) << PRIORITY_SHIFT
            | (self.compression as u32) << COMPRESSION_SHIFT
            | (self.content_format as u32) << FORMAT_SHIFT;
        if self.tag != 0 {
            flags |= TAG_PRESENT;
        }
        if !self.payload.is_empty() {
            flags |= PAYLOAD_PRESENT;
        }
        flags
    }

    /// Exact length of [`Message::encode`]'s output.
    ///
    /// Used to judge whether a message fits a single datagram.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut len = 16 + 16 + 2 + 2 + 4;
        if self.tag != 0 {
            len += 8;
        }
        if !self.payload.is_empty() {
            len += 4 + self.payload.len();
        }
        len
    }

    /// Serialize to the wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(self.id.as_bytes());
        buf.put_slice(self.command.as_bytes());
        buf.put_u16(self.protocol_version_low);
        buf.put_u16(self.protocol_version_high);
        buf.put_u32(self.pack_flags());
        if self.tag != 0 {
            buf.put_u64(self.tag);
        }
        if !self.payload.is_empty() {
            buf.put_u32(self.payload.len() as u32);
            buf.put_slice(&self.payload);
        }
        buf.freeze()
    }

    /// Parse the wire form back into a message.
    ///
    /// Transport bookkeeping fields come back at their defaults; the
    /// receiving transport fills them in.
    pub fn decode(mut src: Bytes) -> Result<Self> {
        if src.remaining() < 40 {
            return Err(WirelineError::malformed(format!(
                "header truncated: {} bytes",
                src.remaining()
            )));
        }

        let mut id_bytes = [0u8; 16];
        src.copy_to_slice(&mut id_bytes);
        let mut command_bytes = [0u8; 16];
        src.copy_to_slice(&mut command_bytes);

        let protocol_version_low = src.get_u16();
        let protocol_version_high = src.get_u16();
        let flags = src.get_u32();

        let kind = match (flags >> KIND_SHIFT) & 0x07 {
            0 => MessageKind::Command,
            1 => MessageKind::Answer,
            2 => MessageKind::Event,
            n => return Err(WirelineError::malformed(format!("bad message kind {n}"))),
        };
        let exec_status = match (flags >> STATUS_SHIFT) & 0x07 {
            0 => ExecStatus::Unknown,
            1 => ExecStatus::Success,
            2 => ExecStatus::Failed,
            3 => ExecStatus::Error,
            n => return Err(WirelineError::malformed(format!("bad exec status {n}"))),
        };
        let priority = match (flags >> PRIORITY_SHIFT) & 0x03 {
            0 => Priority::High,
            1 => Priority::Normal,
            2 => Priority::Low,
            n => return Err(WirelineError::malformed(format!("bad priority {n}"))),
        };
        let compression = match (flags >> COMPRESSION_SHIFT) & 0x07 {
            0 => Compression::None,
            1 => Compression::Zip,
            2 => Compression::Disable,
            n => return Err(WirelineError::malformed(format!("bad compression {n}"))),
        };
        let content_format = match (flags >> FORMAT_SHIFT) & 0x07 {
            0 => ContentFormat::Binary,
            1 => ContentFormat::Json,
            n => return Err(WirelineError::malformed(format!("bad content format {n}"))),
        };

        let tag = if flags & TAG_PRESENT != 0 {
            if src.remaining() < 8 {
                return Err(WirelineError::malformed("tag field truncated"));
            }
            src.get_u64()
        } else {
            0
        };

        let payload = if flags & PAYLOAD_PRESENT != 0 {
            if src.remaining() < 4 {
                return Err(WirelineError::malformed("payload length truncated"));
            }
            let len = src.get_u32() as usize;
            if src.remaining() < len {
                return Err(WirelineError::malformed(format!(
                    "payload truncated: expected {len}, got {}",
                    src.remaining()
                )));
            }
            src.split_to(len)
        } else {
            Bytes::new()
        };

        Ok(Self {
            id: Uuid::from_bytes(id_bytes),
            command: Uuid::from_bytes(command_bytes),
            protocol_version_low,
            protocol_version_high,
            kind,
            exec_status,
            priority,
            compression,
            content_format,
            tag,
            payload,
            transport: TransportKind::Unknown,
            descriptor: -1,
            source_addr: None,
            peer_name: None,
            dest_descriptors: SmallVec::new(),
            dest_addrs: SmallVec::new(),
        })
    }
}
