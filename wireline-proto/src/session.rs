//! Sans-IO negotiation session.
//!
//! The session owns the per-connection protocol state: the compatibility
//! verdict and the close-connection handshake bookkeeping. It never
//! touches a socket — the channel worker feeds it intercepted control
//! messages and acts on the events it returns, which keeps every state
//! transition unit-testable without I/O.

use uuid::Uuid;
use wireline_core::command;
use wireline_core::data::CloseConnection;
use wireline_core::message::{Message, MessageKind, Priority};
use wireline_core::version::{self, PROTOCOL_VERSION_HIGH, PROTOCOL_VERSION_LOW};

/// Binary-protocol compatibility verdict for one connection.
///
/// Independent of the physical connect state: a link can be up while the
/// verdict is still `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Undefined = 0,
    Compatible = 1,
    Incompatible = 2,
}

/// What the worker must do in response to a control message.
#[derive(Debug)]
pub enum SessionEvent {
    /// Transmit this message ahead of application traffic.
    Send(Message),
    /// Compatibility confirmed; notify the owner.
    Connected,
    /// Stop the worker once queued output has been flushed.
    Finish(FinishReason),
}

/// Why the session asked the worker to stop.
#[derive(Debug)]
pub enum FinishReason {
    /// The peer requested the close; its stated reason, already answered.
    CloseRequested { reason: String },
    /// The peer acknowledged our close request.
    CloseAcknowledged,
}

/// Per-connection negotiation state machine.
pub struct Session {
    state: LinkState,
    check_compatibility: bool,
    // Id of our outgoing close request, for matching the peer's answer
    close_id: Option<Uuid>,
}

impl Session {
    #[must_use]
    pub fn new(check_compatibility: bool) -> Self {
        Self {
            state: LinkState::Undefined,
            check_compatibility,
            close_id: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The first framed message on every connection: our version window.
    ///
    /// The window rides in the message header, so the payload stays
    /// empty.
    #[must_use]
    pub fn hello(&self) -> Message {
        let mut message = Message::new(command::PROTOCOL_COMPATIBLE);
        message.set_priority(Priority::High);
        message
    }

    /// Start the close handshake with a stated reason.
    ///
    /// The returned message must be transmitted; the worker keeps running
    /// until the peer's answer arrives (matched via
    /// [`FinishReason::CloseAcknowledged`]).
    pub fn begin_close(&mut self, reason: impl Into<String>) -> Message {
        let mut message = CloseConnection::new(reason).to_message();
        message.set_priority(Priority::High);
        self.close_id = Some(message.id());
        message
    }

    /// Whether an inbound message belongs to the session rather than the
    /// application.
    #[must_use]
    pub fn is_control(&self, message: &Message) -> bool {
        (self.state == LinkState::Undefined
            && message.command() == command::PROTOCOL_COMPATIBLE)
            || message.command() == command::CLOSE_CONNECTION
    }

    /// Process one intercepted control message.
    pub fn on_control(&mut self, message: &Message) -> Vec<SessionEvent> {
        if message.command() == command::PROTOCOL_COMPATIBLE {
            self.on_protocol_compatible(message)
        } else if message.command() == command::CLOSE_CONNECTION {
            self.on_close_connection(message)
        } else {
            Vec::new()
        }
    }

    fn on_protocol_compatible(&mut self, message: &Message) -> Vec<SessionEvent> {
        if message.kind() != MessageKind::Command {
            return Vec::new();
        }

        let (remote_low, remote_high) = message.protocol_versions();

        self.state = LinkState::Compatible;
        if self.check_compatibility {
            tracing::debug!(
                "[Session] Checking binary protocol compatibility. \
                 This protocol version: {PROTOCOL_VERSION_LOW}-{PROTOCOL_VERSION_HIGH}. \
                 Remote protocol version: {remote_low}-{remote_high}"
            );
            if !version::compatible(remote_low, remote_high) {
                self.state = LinkState::Incompatible;
            }
        }

        if self.state == LinkState::Compatible {
            return vec![SessionEvent::Connected];
        }

        let close = CloseConnection::new(format!(
            "Binary protocol versions incompatible. \
             This protocol version: {PROTOCOL_VERSION_LOW}-{PROTOCOL_VERSION_HIGH}. \
             Remote protocol version: {remote_low}-{remote_high}"
        ));
        tracing::debug!(
            "[Session] Send request to close the connection. Detail: {}",
            close.reason
        );
        let mut request = close.to_message();
        request.set_priority(Priority::High);
        self.close_id = Some(request.id());
        vec![SessionEvent::Send(request)]
    }

    fn on_close_connection(&mut self, message: &Message) -> Vec<SessionEvent> {
        match message.kind() {
            MessageKind::Command => {
                let reason = match CloseConnection::from_message(message) {
                    Ok(close) => {
                        tracing::debug!(
                            "[Session] Connection will be closed at the request of the \
                             remote side. Remote detail: {}",
                            close.reason
                        );
                        close.reason
                    }
                    Err(e) => {
                        tracing::error!(
                            "[Session] Incorrect data structure for close request: {e}"
                        );
                        String::new()
                    }
                };

                let mut answer = message.answer();
                answer.set_priority(Priority::High);
                vec![
                    SessionEvent::Send(answer),
                    SessionEvent::Finish(FinishReason::CloseRequested { reason }),
                ]
            }
            MessageKind::Answer if Some(message.id()) == self.close_id => {
                vec![SessionEvent::Finish(FinishReason::CloseAcknowledged)]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireline_core::message::ExecStatus;

    fn peer_hello(low: u16, high: u16) -> Message {
        let mut m = Session::new(true).hello();
        m.set_protocol_versions(low, high);
        m
    }

    #[test]
    fn overlapping_windows_reach_compatible() {
        let mut session = Session::new(true);
        let events = session.on_control(&peer_hello(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));
        assert!(matches!(events.as_slice(), [SessionEvent::Connected]));
        assert_eq!(session.state(), LinkState::Compatible);
    }

    #[test]
    fn disjoint_windows_start_close_handshake() {
        let mut session = Session::new(true);
        let events = session.on_control(&peer_hello(
            PROTOCOL_VERSION_HIGH + 1,
            PROTOCOL_VERSION_HIGH + 5,
        ));
        assert_eq!(session.state(), LinkState::Incompatible);

        let [SessionEvent::Send(request)] = events.as_slice() else {
            panic!("expected a close request, got {events:?}");
        };
        assert_eq!(request.command(), command::CLOSE_CONNECTION);
        assert_eq!(request.priority(), Priority::High);

        // Peer answers our request: session is done
        let mut answer = request.answer();
        answer.set_exec_status(ExecStatus::Success);
        let events = session.on_control(&answer);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Finish(FinishReason::CloseAcknowledged)]
        ));
    }

    #[test]
    fn disabled_check_accepts_anything() {
        let mut session = Session::new(false);
        let events = session.on_control(&peer_hello(999, 1000));
        assert!(matches!(events.as_slice(), [SessionEvent::Connected]));
        assert_eq!(session.state(), LinkState::Compatible);
    }

    #[test]
    fn remote_close_request_is_answered_then_finishes() {
        let mut session = Session::new(true);
        session.on_control(&peer_hello(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));

        let request = {
            let mut m = CloseConnection::new("maintenance window").to_message();
            m.set_priority(Priority::High);
            m
        };
        let events = session.on_control(&request);
        let [SessionEvent::Send(answer), SessionEvent::Finish(FinishReason::CloseRequested { reason })] =
            events.as_slice()
        else {
            panic!("expected answer + finish, got {events:?}");
        };
        assert_eq!(answer.id(), request.id());
        assert_eq!(answer.kind(), MessageKind::Answer);
        assert_eq!(answer.exec_status(), ExecStatus::Success);
        assert_eq!(reason.as_str(), "maintenance window");
    }

    #[test]
    fn unrelated_close_answer_is_ignored() {
        let mut session = Session::new(true);
        session.on_control(&peer_hello(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));
        let _ = session.begin_close("shutting down");

        // An answer with a different id must not finish the session
        let mut stray = CloseConnection::new("x").to_message();
        stray.set_kind(MessageKind::Answer);
        assert!(session.on_control(&stray).is_empty());
    }

    #[test]
    fn local_close_matches_peer_answer() {
        let mut session = Session::new(true);
        session.on_control(&peer_hello(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));

        let request = session.begin_close("operator request");
        let answer = request.answer();
        let events = session.on_control(&answer);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Finish(FinishReason::CloseAcknowledged)]
        ));
    }

    #[test]
    fn control_detection_tracks_state() {
        let session = Session::new(true);
        let hello = session.hello();
        assert!(session.is_control(&hello));

        let mut compatible = Session::new(true);
        compatible.on_control(&peer_hello(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));
        // Once compatible, a stray hello is application traffic
        assert!(!compatible.is_control(&hello));
        // Close requests are always control
        assert!(compatible.is_control(&CloseConnection::new("x").to_message()));
    }
}
