//! Payload structures for the protocol's built-in commands.
//!
//! Each structure knows how to write itself into a [`Message`] for its
//! command id and read itself back out, so the transport layer never
//! touches raw payload bytes for its own traffic.

use crate::command;
use crate::error::{Result, WirelineError};
use crate::message::{Message, TransportKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use uuid::Uuid;

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

fn get_string(src: &mut Bytes) -> Result<String> {
    if src.remaining() < 4 {
        return Err(WirelineError::malformed("string length truncated"));
    }
    let len = src.get_u32() as usize;
    if src.remaining() < len {
        return Err(WirelineError::malformed("string body truncated"));
    }
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| WirelineError::malformed(e.to_string()))
}

fn content_of(message: &Message, expected: Uuid) -> Result<Bytes> {
    if message.command() != expected {
        return Err(WirelineError::malformed(format!(
            "message carries command {}, expected {expected}",
            message.command()
        )));
    }
    message.content()
}

/// Reason attached to a close-connection request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct CloseConnection {
    pub reason: String,
}

impl CloseConnection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Build the close-connection request carrying this reason.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.reason);
        let mut message = Message::new(command::CLOSE_CONNECTION);
        message.set_payload(buf.freeze());
        message
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        let mut content = content_of(message, command::CLOSE_CONNECTION)?;
        Ok(Self {
            reason: get_string(&mut content)?,
        })
    }
}

/// Notice sent back to a peer whose command this process does not
/// understand. Carries enough context for the remote log line to make
/// sense without correlation work.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct UnknownCommand {
    /// The command id that was not recognized.
    pub command: Uuid,
    /// Transport of the connection the command arrived on.
    pub transport: TransportKind,
    /// Stream descriptor on the reporting side, -1 for datagrams.
    pub descriptor: i64,
    /// Peer address, for TCP and datagram transports.
    pub address: Option<SocketAddr>,
    /// Endpoint name, for Unix-domain transports.
    pub endpoint_name: Option<String>,
}

impl UnknownCommand {
    /// Describe `message` as unknown, capturing its connection context.
    #[must_use]
    pub fn describing(message: &Message) -> Self {
        Self {
            command: message.command(),
            transport: message.transport(),
            descriptor: message.descriptor(),
            address: message.source_addr(),
            endpoint_name: message.peer_name().map(str::to_string),
        }
    }

    /// Build the notice message addressed back to the sender.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let mut buf = BytesMut::new();
        buf.put_slice(self.command.as_bytes());
        buf.put_u8(self.transport as u8);
        buf.put_i64(self.descriptor);
        put_string(
            &mut buf,
            &self.address.map(|a| a.to_string()).unwrap_or_default(),
        );
        put_string(&mut buf, self.endpoint_name.as_deref().unwrap_or_default());

        let mut message = Message::new(command::UNKNOWN_COMMAND);
        message.set_payload(buf.freeze());
        message
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        let mut content = content_of(message, command::UNKNOWN_COMMAND)?;
        if content.remaining() < 16 + 1 + 8 {
            return Err(WirelineError::malformed("unknown-command notice truncated"));
        }
        let mut id_bytes = [0u8; 16];
        content.copy_to_slice(&mut id_bytes);
        let transport = match content.get_u8() {
            0 => TransportKind::Unknown,
            1 => TransportKind::Stream,
            2 => TransportKind::Local,
            3 => TransportKind::Datagram,
            n => {
                return Err(WirelineError::malformed(format!(
                    "bad transport kind {n}"
                )))
            }
        };
        let descriptor = content.get_i64();
        let address_raw = get_string(&mut content)?;
        let endpoint_raw = get_string(&mut content)?;

        let address = if address_raw.is_empty() {
            None
        } else {
            Some(
                address_raw
                    .parse()
                    .map_err(|_| WirelineError::malformed("bad peer address"))?,
            )
        };
        Ok(Self {
            command: Uuid::from_bytes(id_bytes),
            transport,
            descriptor,
            address,
            endpoint_name: (!endpoint_raw.is_empty()).then_some(endpoint_raw),
        })
    }
}

/// Error description sent as an `Answer` with `ExecStatus::Error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorInfo {
    /// Caller-defined grouping of related errors.
    pub group: i32,
    /// Stable global error code.
    pub code: Uuid,
    pub description: String,
}

impl ErrorInfo {
    pub fn new(group: i32, code: Uuid, description: impl Into<String>) -> Self {
        Self {
            group,
            code,
            description: description.into(),
        }
    }

    /// Write this error into `message`'s payload.
    pub fn write_to(&self, message: &mut Message) {
        let mut buf = BytesMut::new();
        buf.put_i32(self.group);
        buf.put_slice(self.code.as_bytes());
        put_string(&mut buf, &self.description);
        message.set_payload(buf.freeze());
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        let mut content = message.content()?;
        if content.remaining() < 4 + 16 {
            return Err(WirelineError::malformed("error info truncated"));
        }
        let group = content.get_i32();
        let mut code_bytes = [0u8; 16];
        content.copy_to_slice(&mut code_bytes);
        Ok(Self {
            group,
            code: Uuid::from_bytes(code_bytes),
            description: get_string(&mut content)?,
        })
    }
}

/// Non-error failure description sent as an `Answer` with
/// `ExecStatus::Failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct FailureInfo {
    /// Caller-defined grouping of related failures.
    pub group: i32,
    /// Stable global failure code.
    pub code: Uuid,
    pub description: String,
}

impl FailureInfo {
    pub fn new(group: i32, code: Uuid, description: impl Into<String>) -> Self {
        Self {
            group,
            code,
            description: description.into(),
        }
    }

    /// Write this failure into `message`'s payload.
    pub fn write_to(&self, message: &mut Message) {
        let mut buf = BytesMut::new();
        buf.put_i32(self.group);
        buf.put_slice(self.code.as_bytes());
        put_string(&mut buf, &self.description);
        message.set_payload(buf.freeze());
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        let mut content = message.content()?;
        if content.remaining() < 4 + 16 {
            return Err(WirelineError::malformed("failure info truncated"));
        }
        let group = content.get_i32();
        let mut code_bytes = [0u8; 16];
        content.copy_to_slice(&mut code_bytes);
        Ok(Self {
            group,
            code: Uuid::from_bytes(code_bytes),
            description: get_string(&mut content)?,
        })
    }
}
