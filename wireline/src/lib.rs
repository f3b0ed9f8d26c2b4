//! # Wireline
//!
//! A peer-to-peer message transport for distributed application
//! components: connect over TCP, Unix-domain or UDP sockets, negotiate
//! protocol compatibility, then exchange discrete, typed, prioritized
//! messages with optional payload compression, explicit recovery for
//! unknown commands and graceful shutdown.
//!
//! ## Architecture
//!
//! Wireline is split into focused crates:
//!
//! - **`wireline-core`**: message model, priority queue, command
//!   registry, endpoint addressing, compression helpers
//! - **`wireline-proto`**: wire codec, negotiation session, connection
//!   actors, listeners and transports
//! - **`wireline`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ### Client
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wireline::prelude::*;
//! use wireline::tcp;
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
//!     if channel.wait_connection(std::time::Duration::from_secs(5)).await {
//!         channel.send(Arc::new(Message::event(
//!             "6cbe3b6c-1d29-4bb2-8c2f-6f2d55e0b1c4".parse()?,
//!         )));
//!     }
//!     # let _ = events;
//!     Ok(())
//! }
//! ```
//!
//! ### Server
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wireline::prelude::*;
//! use wireline::tcp;
//!
//! #[compio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(CommandRegistry::with_builtins());
//!     let listener = tcp::Listener::bind(
//!         "127.0.0.1:5555".parse()?,
//!         ChannelOptions::default(),
//!         registry,
//!     )
//!     .await?;
//!
//!     let events = listener.events();
//!     while let Ok(event) = events.recv_async().await {
//!         if let wireline::ChannelEvent::Message(message) = event {
//!             // Answers route back over the connection they came from
//!             listener.send(Arc::new(message.answer()), &[]);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod dev_tracing;

// Core data model
pub use wireline_core::command::{self, CommandRegistry};
pub use wireline_core::data::{CloseConnection, ErrorInfo, FailureInfo, UnknownCommand};
pub use wireline_core::endpoint::Endpoint;
pub use wireline_core::error::{Result, WirelineError};
pub use wireline_core::message::{
    Compression, Descriptor, ExecStatus, Message, MessageKind, Priority, TransportKind,
};
pub use wireline_core::options::ChannelOptions;
pub use wireline_core::queue::PriorityQueue;
pub use wireline_core::version::{PROTOCOL_VERSION_HIGH, PROTOCOL_VERSION_LOW};

// Protocol and transports
pub use wireline_proto::channel::{ChannelEvent, ChannelHandle, LinkInfo};
pub use wireline_proto::listener::ChannelSet;
pub use wireline_proto::session::LinkState;
pub use wireline_proto::udp::DatagramHandle;
pub use wireline_proto::{codec, session, signature, tcp, udp};

#[cfg(unix)]
pub use wireline_proto::local;

/// Prelude module for convenient imports
///
/// ```rust
/// use wireline::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ChannelEvent, ChannelHandle, ChannelOptions, CommandRegistry, Descriptor, Endpoint,
        ExecStatus, LinkState, Message, MessageKind, Priority, Result, TransportKind,
        WirelineError,
    };
    pub use bytes::Bytes;
    pub use std::sync::Arc;
}
