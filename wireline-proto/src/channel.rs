//! Connection actor.
//!
//! One actor == one physical connection.
//!
//! Responsibilities:
//! - Own the stream (AsyncRead + AsyncWrite)
//! - Exchange protocol signatures, then drive the version handshake
//! - Drain the priority queue onto the wire, one frame per step
//! - Parse inbound frames, intercepting session traffic
//! - Emit lifecycle events (Connected / Message / Disconnected)
//!
//! The worker runs as a single spawned task and never blocks
//! indefinitely: every socket wait is bounded by a small timeout so stop
//! requests are honored within one poll interval. The owner talks to the
//! worker through a cloneable [`ChannelHandle`]; the worker talks back
//! through a `flume` event channel.

use crate::codec::{self, CompressionPolicy, FrameDecoder};
use crate::session::{FinishReason, LinkState, Session, SessionEvent};
use crate::signature;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use dashmap::DashSet;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;
use wireline_core::command::{self, CommandRegistry};
use wireline_core::data::UnknownCommand;
use wireline_core::error::{Result, WirelineError};
use wireline_core::message::{Descriptor, Message, Priority, TransportKind};
use wireline_core::options::ChannelOptions;
use wireline_core::queue::PriorityQueue;

/// Read chunk size for the inbound pump.
const READ_CHUNK: usize = 8192;

/// Time budget for one outbound or delivery phase inside a loop
/// iteration. Keeps the loop responsive to inbound traffic and stop
/// requests while traffic is heavy.
const PHASE_BUDGET: Duration = Duration::from_millis(150);

/// Poll interval used while outbound or delivery work is backed up.
const FAST_POLL: Duration = Duration::from_millis(1);

/// Identity of one physical link, fixed at connect/accept time.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub transport: TransportKind,
    pub descriptor: Descriptor,
    /// Peer address, for TCP links.
    pub peer_addr: Option<SocketAddr>,
    /// Endpoint name, for Unix-domain links.
    pub peer_name: Option<String>,
    /// Unix-domain or loopback-TCP link; frame compression is skipped.
    pub local_link: bool,
}

impl fmt::Display for LinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "descriptor: {}", self.descriptor)?;
        if let Some(addr) = self.peer_addr {
            write!(f, "; peer: {addr}")?;
        }
        if let Some(name) = &self.peer_name {
            write!(f, "; endpoint: {name}")?;
        }
        Ok(())
    }
}

/// Events a channel reports to its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Physical link is up and the version handshake succeeded.
    Connected(Descriptor),
    /// An application message arrived.
    Message(Arc<Message>),
    /// The physical link is gone and the worker has exited.
    Disconnected(Descriptor),
}

/// Commands from the handle to the worker.
enum ChannelCmd {
    /// Begin the graceful close handshake with a reason.
    Close(String),
    /// Stop the worker without a handshake.
    Stop,
}

/// State shared between the handle(s) and the worker.
struct Shared {
    queue: PriorityQueue,
    /// Commands the remote side reported as unknown.
    unknown: DashSet<Uuid>,
    link_state: AtomicU8,
    link_up: AtomicBool,
    running: AtomicBool,
    info: LinkInfo,
}

impl Shared {
    fn link_state(&self) -> LinkState {
        match self.link_state.load(Ordering::Relaxed) {
            0 => LinkState::Undefined,
            1 => LinkState::Compatible,
            _ => LinkState::Incompatible,
        }
    }
}

/// Owner-facing API of one connection actor.
///
/// Cheap to clone; the worker stops when the last handle is dropped.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
    cmd_tx: flume::Sender<ChannelCmd>,
    registry: Arc<CommandRegistry>,
    check_unknown: bool,
    _worker: Arc<compio::runtime::Task<()>>,
}

impl ChannelHandle {
    /// Queue a message for transmission.
    ///
    /// Returns `false` — logging why, with no side effect — when the
    /// worker is not running or the destination command is known to be
    /// unsupported by the remote peer.
    pub fn send(&self, message: Arc<Message>) -> bool {
        if !self.is_running() {
            error!(
                "[Channel] Worker is not active. Command {} will be discarded",
                self.registry.display(message.command())
            );
            return false;
        }
        if self.check_unknown && self.shared.unknown.contains(&message.command()) {
            error!(
                "[Channel] Command {} is unknown for the receiving side. \
                 Command will be discarded",
                self.registry.display(message.command())
            );
            return false;
        }
        trace!(
            "[Channel] Message queued for sending; id: {}; command: {}",
            message.id(),
            self.registry.display(message.command())
        );
        self.shared.queue.push(message);
        true
    }

    /// Queue a bare command message.
    pub fn send_command(&self, command: Uuid) -> bool {
        self.send(Arc::new(Message::new(command)))
    }

    /// Cancel all queued (not yet sent) messages carrying `command`.
    pub fn remove(&self, command: Uuid) {
        let removed = self.shared.queue.remove_where(|m| m.command() == command);
        if removed > 0 {
            debug!(
                "[Channel] {removed} queued messages removed; command: {}",
                self.registry.display(command)
            );
        }
    }

    /// Number of messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the worker task is still alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Whether the physical link is up, regardless of compatibility.
    pub fn link_is_up(&self) -> bool {
        self.shared.link_up.load(Ordering::Relaxed)
    }

    /// Compatibility verdict for this connection.
    pub fn link_state(&self) -> LinkState {
        self.shared.link_state()
    }

    /// True only when the physical link is open and the version
    /// handshake confirmed compatibility.
    pub fn is_connected(&self) -> bool {
        self.link_is_up() && self.shared.link_state() == LinkState::Compatible
    }

    pub fn descriptor(&self) -> Descriptor {
        self.shared.info.descriptor
    }

    pub fn info(&self) -> &LinkInfo {
        &self.shared.info
    }

    /// Whether this link never leaves the machine.
    pub fn is_local(&self) -> bool {
        self.shared.info.local_link
    }

    /// Synchronous-style barrier: poll until connected or `timeout`
    /// expires. Returns whether the connection was established.
    pub async fn wait_connection(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.is_connected() {
                return true;
            }
            if !self.is_running() || started.elapsed() >= timeout {
                return false;
            }
            compio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Begin the graceful close handshake with a stated reason. The
    /// worker exits once the peer acknowledges.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.cmd_tx.send(ChannelCmd::Close(reason.into()));
    }

    /// Request the worker to stop and wait up to `timeout` for it to
    /// exit. Returns whether it exited in time; on `false` the worker is
    /// still winding down and callers must re-check.
    pub async fn disconnect(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        let _ = self.cmd_tx.send(ChannelCmd::Stop);
        let started = Instant::now();
        while self.is_running() {
            if started.elapsed() >= timeout {
                return false;
            }
            compio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("info", &self.shared.info)
            .field("running", &self.is_running())
            .field("link_state", &self.shared.link_state())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Spawn a connection actor over `stream` and return its handle.
///
/// Lifecycle events and inbound messages arrive on `event_tx`; the
/// caller keeps the matching receiver.
pub(crate) fn spawn<S>(
    stream: S,
    info: LinkInfo,
    options: ChannelOptions,
    registry: Arc<CommandRegistry>,
    event_tx: flume::Sender<ChannelEvent>,
) -> ChannelHandle
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    let (cmd_tx, cmd_rx) = flume::unbounded();
    let check_unknown = options.check_unknown_commands;
    let shared = Arc::new(Shared {
        queue: PriorityQueue::new(),
        unknown: DashSet::new(),
        link_state: AtomicU8::new(LinkState::Undefined as u8),
        link_up: AtomicBool::new(true),
        running: AtomicBool::new(true),
        info,
    });

    let worker = Channel {
        stream,
        shared: Arc::clone(&shared),
        session: Session::new(options.check_compatibility),
        decoder: FrameDecoder::new(),
        registry: Arc::clone(&registry),
        event_tx,
        cmd_rx,
        internal: VecDeque::new(),
        accepted: VecDeque::new(),
        finish: false,
        options,
    };
    let task = compio::runtime::spawn(worker.run());

    ChannelHandle {
        shared,
        cmd_tx,
        registry,
        check_unknown,
        _worker: Arc::new(task),
    }
}

enum ReadOutcome {
    /// No bytes within the poll interval.
    Idle,
    /// Some bytes arrived and were fed to the decoder.
    Progress,
    /// Peer closed the connection.
    Eof,
}

/// The worker half of one connection actor.
struct Channel<S> {
    stream: S,
    shared: Arc<Shared>,
    session: Session,
    decoder: FrameDecoder,
    registry: Arc<CommandRegistry>,
    event_tx: flume::Sender<ChannelEvent>,
    cmd_rx: flume::Receiver<ChannelCmd>,
    /// Session-internal outbound traffic, always ahead of the queue.
    internal: VecDeque<Arc<Message>>,
    /// Parsed application messages awaiting delivery.
    accepted: VecDeque<Message>,
    /// Exit once queued output is flushed.
    finish: bool,
    options: ChannelOptions,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    async fn run(mut self) {
        debug!("[Channel] Worker started; {}", self.shared.info);

        match self.exchange_signatures().await {
            Ok(()) => {
                let hello = self.session.hello();
                self.internal.push_back(Arc::new(hello));
                if let Err(e) = self.main_loop().await {
                    error!("[Channel] {e}; {}", self.shared.info);
                }
            }
            Err(e) => {
                error!(
                    "[Channel] Protocol signature exchange failed: {e}; {}",
                    self.shared.info
                );
            }
        }

        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.link_up.store(false, Ordering::Relaxed);
        let _ = self
            .event_tx
            .send(ChannelEvent::Disconnected(self.shared.info.descriptor));
        debug!("[Channel] Worker stopped; {}", self.shared.info);
        // Dropping the stream closes the descriptor
    }

    /// Write our 16-byte signature, then read and verify the peer's.
    async fn exchange_signatures(&mut self) -> Result<()> {
        let BufResult(res, _) = self
            .stream
            .write_all(signature::signature_bytes().to_vec())
            .await;
        res?;
        trace!("[Channel] Protocol signature written");

        let buf = [0u8; signature::SIGNATURE_LEN];
        let BufResult(res, buf) = match compio::time::timeout(
            self.options.signature_timeout,
            self.stream.read_exact(buf),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => {
                return Err(WirelineError::Timeout(self.options.signature_timeout));
            }
        };
        res?;
        signature::verify(&buf)
    }

    async fn main_loop(&mut self) -> Result<()> {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(ChannelCmd::Stop) => {
                    debug!("[Channel] Stop requested; {}", self.shared.info);
                    return Ok(());
                }
                Ok(ChannelCmd::Close(reason)) => {
                    debug!(
                        "[Channel] Close requested; reason: {reason}; {}",
                        self.shared.info
                    );
                    let request = self.session.begin_close(reason);
                    self.internal.push_back(Arc::new(request));
                }
                Err(flume::TryRecvError::Empty) => {}
                Err(flume::TryRecvError::Disconnected) => {
                    debug!("[Channel] All handles dropped; {}", self.shared.info);
                    return Ok(());
                }
            }

            self.write_pending().await?;

            if self.finish && self.internal.is_empty() {
                return Ok(());
            }

            match self.read_step().await? {
                ReadOutcome::Eof => {
                    debug!("[Channel] Connection closed by peer; {}", self.shared.info);
                    return Ok(());
                }
                ReadOutcome::Idle | ReadOutcome::Progress => {}
            }

            if self.finish && self.internal.is_empty() {
                return Ok(());
            }

            self.deliver_accepted();
        }
    }

    /// Outbound phase: session traffic first, then the priority queue,
    /// one frame per step under a small time budget.
    async fn write_pending(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let message = match self.internal.pop_front() {
                Some(m) => Some(m),
                None if self.session.state() == LinkState::Compatible => {
                    self.shared.queue.pop_next()
                }
                None => None,
            };
            let Some(message) = message else {
                return Ok(());
            };

            trace!(
                "[Channel] Sending message; id: {}; command: {}",
                message.id(),
                self.registry.display(message.command())
            );

            let policy = CompressionPolicy {
                level: self.options.compression_level,
                threshold: self.options.compression_threshold,
                local_link: self.shared.info.local_link,
            };
            let frame = match codec::encode_frame(&message, &policy) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(
                        "[Channel] Failed to encode message; command: {}: {e}",
                        self.registry.display(message.command())
                    );
                    continue;
                }
            };

            let BufResult(res, _) = self.stream.write_all(frame.to_vec()).await;
            res?;

            if started.elapsed() >= PHASE_BUDGET {
                return Ok(());
            }
        }
    }

    fn has_backlog(&self) -> bool {
        !self.internal.is_empty()
            || !self.accepted.is_empty()
            || (self.session.state() == LinkState::Compatible && !self.shared.queue.is_empty())
    }

    /// Inbound phase: one bounded read, then drain every complete frame.
    async fn read_step(&mut self) -> Result<ReadOutcome> {
        let poll = if self.has_backlog() {
            FAST_POLL
        } else {
            self.options.poll_interval
        };

        let buf = vec![0u8; READ_CHUNK];
        let BufResult(res, buf) = match compio::time::timeout(poll, self.stream.read(buf)).await {
            Ok(r) => r,
            Err(_) => return Ok(ReadOutcome::Idle),
        };
        let n = res?;
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        self.decoder.push(&buf[..n]);
        self.drain_decoder()?;
        Ok(ReadOutcome::Progress)
    }

    fn drain_decoder(&mut self) -> Result<()> {
        while let Some(frame) = self.decoder.next()? {
            let compressed = frame.compressed;
            match frame.into_message() {
                Ok(message) => self.dispatch_inbound(message),
                Err(e) => {
                    // One bad frame never kills the connection
                    warn!(
                        "[Channel] Dropping undecodable{} frame: {e}; {}",
                        if compressed { " compressed" } else { "" },
                        self.shared.info
                    );
                }
            }
        }
        Ok(())
    }

    fn dispatch_inbound(&mut self, mut message: Message) {
        let info = &self.shared.info;
        message.set_transport(info.transport);
        message.set_descriptor(info.descriptor);
        if let Some(addr) = info.peer_addr {
            message.set_source_addr(addr);
        }
        if let Some(name) = &info.peer_name {
            message.set_peer_name(name.clone());
        }

        trace!(
            "[Channel] Message received; id: {}; command: {}",
            message.id(),
            self.registry.display(message.command())
        );

        if self.session.is_control(&message) {
            let events = self.session.on_control(&message);
            self.apply_session_events(events);
            return;
        }

        if self.session.state() == LinkState::Compatible {
            self.accepted.push_back(message);
        } else {
            error!(
                "[Channel] Compatibility check not yet performed. Command {} discarded",
                self.registry.display(message.command())
            );
        }
    }

    fn apply_session_events(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Send(message) => {
                    self.internal.push_back(Arc::new(message));
                }
                SessionEvent::Connected => {
                    debug!("[Channel] Connected; {}", self.shared.info);
                    let _ = self
                        .event_tx
                        .send(ChannelEvent::Connected(self.shared.info.descriptor));
                }
                SessionEvent::Finish(reason) => {
                    match reason {
                        FinishReason::CloseRequested { reason } => debug!(
                            "[Channel] Closing at the request of the remote side: \
                             {reason}; {}",
                            self.shared.info
                        ),
                        FinishReason::CloseAcknowledged => debug!(
                            "[Channel] Close request acknowledged by peer; {}",
                            self.shared.info
                        ),
                    }
                    self.finish = true;
                }
            }
        }
        self.shared
            .link_state
            .store(self.session.state() as u8, Ordering::Relaxed);
    }

    /// Deliver parsed application messages, applying the
    /// unknown-command protocol first.
    fn deliver_accepted(&mut self) {
        if self.session.state() != LinkState::Compatible {
            return;
        }
        let started = Instant::now();
        while let Some(message) = self.accepted.pop_front() {
            if self.options.check_unknown_commands && self.intercept_unknown(&message) {
                // Handled entirely inside the actor
            } else if self
                .event_tx
                .send(ChannelEvent::Message(Arc::new(message)))
                .is_err()
            {
                // Owner failures never abort the worker loop
                error!(
                    "[Channel] Failed to deliver message: owner side is gone; {}",
                    self.shared.info
                );
            }
            if started.elapsed() >= PHASE_BUDGET {
                return;
            }
        }
    }

    /// Returns true when `message` was consumed by the unknown-command
    /// protocol.
    fn intercept_unknown(&mut self, message: &Message) -> bool {
        // The peer told us it does not understand one of our commands
        if message.command() == command::UNKNOWN_COMMAND {
            match UnknownCommand::from_message(message) {
                Ok(notice) => {
                    error!(
                        "[Channel] Command {} is unknown for the remote side; {}",
                        self.registry.display(notice.command),
                        self.shared.info
                    );
                    self.shared.unknown.insert(notice.command);
                }
                Err(e) => {
                    error!(
                        "[Channel] Incorrect data structure for command {}: {e}",
                        self.registry.display(message.command())
                    );
                }
            }
            return true;
        }

        // We do not understand the peer's command: tell it, once per
        // occurrence, and drop the message
        if !self.registry.contains(message.command()) {
            let notice = UnknownCommand::describing(message);
            error!(
                "[Channel] Unknown command: {}; {}",
                notice.command, self.shared.info
            );
            let mut reply = notice.to_message();
            reply.set_priority(Priority::High);
            self.internal.push_back(Arc::new(reply));
            return true;
        }

        false
    }
}
