//! Wireline Core
//!
//! This crate contains the runtime-agnostic building blocks of the
//! wireline transport:
//! - Message value object with binary wire codec (`message`)
//! - Priority message queue with weighted dequeue (`queue`)
//! - Command identifiers and registry (`command`)
//! - Built-in command payloads (`data`)
//! - Endpoint addressing (`endpoint`)
//! - zlib compression helpers (`compress`)
//! - Channel/listener configuration (`options`)
//! - Protocol version window (`version`)
//! - Error types (`error`)

// The tcp module needs raw fd/socket access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod command;
pub mod compress;
pub mod data;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod options;
pub mod queue;
pub mod tcp;
pub mod version;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::command::CommandRegistry;
    pub use crate::data::{CloseConnection, ErrorInfo, FailureInfo, UnknownCommand};
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Result, WirelineError};
    pub use crate::message::{
        Compression, Descriptor, ExecStatus, Message, MessageKind, Priority, TransportKind,
    };
    pub use crate::options::ChannelOptions;
    pub use crate::queue::PriorityQueue;
}
