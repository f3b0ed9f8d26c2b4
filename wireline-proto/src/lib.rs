//! # Wireline Proto
//!
//! Wire protocol and connection actors for the wireline message
//! transport.
//!
//! ## Overview
//!
//! - **Signature exchange**: every stream connection opens with a fixed
//!   16-byte signature written by both sides and verified bit-for-bit.
//! - **Version handshake**: the first framed message carries the
//!   sender's binary protocol version window; disjoint windows trigger a
//!   graceful close handshake with a stated reason.
//! - **Framing**: big-endian `i32` length prefix whose sign bit marks a
//!   zlib-compressed body.
//! - **Connection actor**: one worker task per connection, draining a
//!   three-bucket priority queue onto the wire and delivering inbound
//!   messages to the owner as events.
//! - **Listeners**: TCP and Unix-domain acceptors that spawn one actor
//!   per connection, with fan-out send and periodic reaping.
//! - **Datagram endpoint**: self-contained signed datagrams over UDP, no
//!   handshake.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wireline_core::command::CommandRegistry;
//! use wireline_core::options::ChannelOptions;
//! use wireline_proto::{tcp, ChannelEvent};
//!
//! #[compio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(CommandRegistry::with_builtins());
//!     let (channel, events) = tcp::connect(
//!         "127.0.0.1:5555".parse()?,
//!         ChannelOptions::default(),
//!         registry,
//!     )
//!     .await?;
//!
//!     channel.wait_connection(std::time::Duration::from_secs(5)).await;
//!     while let Ok(event) = events.recv_async().await {
//!         if let ChannelEvent::Message(message) = event {
//!             println!("received command {}", message.command());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod channel;
pub mod codec;
pub mod listener;
pub mod session;
pub mod signature;

// Transport adapters
#[cfg(unix)]
pub mod local;
pub mod tcp;
pub mod udp;

// Re-export commonly used types
pub use channel::{ChannelEvent, ChannelHandle, LinkInfo};
pub use listener::ChannelSet;
pub use session::{FinishReason, LinkState, Session, SessionEvent};
pub use udp::DatagramHandle;

/// Prelude module for convenient imports
///
/// ```rust
/// use wireline_proto::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{ChannelEvent, ChannelHandle, LinkInfo};
    pub use crate::listener::ChannelSet;
    pub use crate::session::LinkState;
    pub use crate::udp::DatagramHandle;
    pub use wireline_core::prelude::*;
}
