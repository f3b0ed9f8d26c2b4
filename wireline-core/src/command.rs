//! Command identifiers and the command registry.
//!
//! A command id, once assigned, must never change: peers built from
//! different revisions rely on the ids to agree. The registry maps ids to
//! human-readable names for logging and answers the "do we understand
//! this command?" question for the unknown-command protocol.
//!
//! The registry is built explicitly at startup and handed to channels and
//! listeners by `Arc` — there is no ambient global table.

use hashbrown::HashMap;
use std::borrow::Cow;
use std::fmt;
use uuid::{uuid, Uuid};

/// Notice that the sending side did not recognize a command.
/// Payload: [`crate::data::UnknownCommand`].
pub const UNKNOWN_COMMAND: Uuid = uuid!("9d3ff56d-6c64-4b9e-9b27-5b84c5a61174");

/// Error report detached from any request/answer pairing.
/// Payload: [`crate::data::ErrorInfo`].
pub const ERROR_NOTICE: Uuid = uuid!("c2b0a60e-16f1-47f5-a1ad-4f5de4e37071");

/// First framed message on every stream connection; carries the sender's
/// protocol version window in the message header.
pub const PROTOCOL_COMPATIBLE: Uuid = uuid!("5b1e9ab0-2b6f-4a3e-8c52-27b019cf3a8e");

/// Request to end the session. The initiator states a reason; the peer
/// logs it and answers with an empty `Answer`, after which the link may
/// be torn down. The exchange exists so the side being disconnected
/// learns why.
pub const CLOSE_CONNECTION: Uuid = uuid!("e4d1c8a7-93b5-4f02-bd6e-60c18e2e70d3");

/// Immutable command id → name table.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    names: HashMap<Uuid, Cow<'static, str>>,
}

impl CommandRegistry {
    /// Empty registry. Rarely what you want; see
    /// [`CommandRegistry::with_builtins`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the protocol's built-in commands.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(UNKNOWN_COMMAND, "UnknownCommand");
        registry.register(ERROR_NOTICE, "ErrorNotice");
        registry.register(PROTOCOL_COMPATIBLE, "ProtocolCompatible");
        registry.register(CLOSE_CONNECTION, "CloseConnection");
        registry
    }

    /// Register a command. Returns `false` (and logs) when the id is
    /// already taken by a different name.
    pub fn register(&mut self, id: Uuid, name: impl Into<Cow<'static, str>>) -> bool {
        let name = name.into();
        if let Some(existing) = self.names.get(&id) {
            if *existing != name {
                tracing::error!(
                    "[CommandRegistry] Command id {id} already registered as '{existing}', \
                     refusing to rename to '{name}'"
                );
                return false;
            }
            return true;
        }
        self.names.insert(id, name);
        true
    }

    /// Whether the command is known to this process.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.names.contains_key(&id)
    }

    /// Human-readable name, when registered.
    #[must_use]
    pub fn name(&self, id: Uuid) -> Option<&str> {
        self.names.get(&id).map(Cow::as_ref)
    }

    /// Log-friendly rendering: the registered name, or the id itself for
    /// unregistered commands.
    #[must_use]
    pub fn display(&self, id: Uuid) -> CommandName<'_> {
        CommandName {
            id,
            name: self.name(id),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Display adapter returned by [`CommandRegistry::display`].
pub struct CommandName<'a> {
    id: Uuid,
    name: Option<&'a str>,
}

impl fmt::Display for CommandName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.contains(UNKNOWN_COMMAND));
        assert!(registry.contains(PROTOCOL_COMPATIBLE));
        assert!(registry.contains(CLOSE_CONNECTION));
        assert!(registry.contains(ERROR_NOTICE));
        assert_eq!(registry.name(CLOSE_CONNECTION), Some("CloseConnection"));
    }

    #[test]
    fn unregistered_command_is_unknown() {
        let registry = CommandRegistry::with_builtins();
        assert!(!registry.contains(Uuid::new_v4()));
    }

    #[test]
    fn conflicting_registration_is_refused() {
        let mut registry = CommandRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.register(id, "Ping"));
        assert!(registry.register(id, "Ping"));
        assert!(!registry.register(id, "Pong"));
        assert_eq!(registry.name(id), Some("Ping"));
    }

    #[test]
    fn display_falls_back_to_id() {
        let registry = CommandRegistry::with_builtins();
        let id = Uuid::new_v4();
        assert_eq!(registry.display(id).to_string(), id.to_string());
        assert!(registry
            .display(PROTOCOL_COMPATIBLE)
            .to_string()
            .starts_with("ProtocolCompatible"));
    }
}
