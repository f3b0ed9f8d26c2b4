//! Datagram transport.
//!
//! Unordered, connectionless variant of the message exchange: every
//! datagram is self-contained — a 4-byte signature followed by one
//! serialized message, no handshake and no framing. Compatibility is
//! judged per datagram from the version window every message carries in
//! its header.
//!
//! Datagrams bigger than the conventional safe size are still sent, but
//! logged as at-risk of loss.

use crate::channel::ChannelEvent;
use crate::signature;
use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;
use wireline_core::command::{self, CommandRegistry};
use wireline_core::data::UnknownCommand;
use wireline_core::error::Result;
use wireline_core::message::{Message, Priority, TransportKind};
use wireline_core::options::ChannelOptions;
use wireline_core::queue::PriorityQueue;
use wireline_core::version;

/// Messages encoded beyond this many bytes risk fragmentation loss.
const SAFE_DATAGRAM_LEN: usize = 500;

/// Receive buffer; a UDP payload can never exceed 64 KiB.
const RECV_BUF_LEN: usize = 65536;

const PHASE_BUDGET: Duration = Duration::from_millis(150);
const FAST_POLL: Duration = Duration::from_millis(1);

enum DatagramCmd {
    Stop,
}

struct Shared {
    queue: PriorityQueue,
    unknown: DashSet<Uuid>,
    running: AtomicBool,
    local_addr: SocketAddr,
    /// Source IPs whose datagrams are dropped when they come from our
    /// own port — suppresses self-echo on broadcast networks.
    discard: Mutex<Vec<IpAddr>>,
}

/// Owner-facing API of one bound datagram endpoint.
#[derive(Clone)]
pub struct DatagramHandle {
    shared: Arc<Shared>,
    cmd_tx: flume::Sender<DatagramCmd>,
    registry: Arc<CommandRegistry>,
    check_unknown: bool,
    _worker: Arc<compio::runtime::Task<()>>,
}

impl DatagramHandle {
    /// Queue a message for transmission.
    ///
    /// The message must carry destination addresses, or a source address
    /// to fall back to; without either it is logged and discarded at
    /// send time. Returns `false` when the worker is not running or the
    /// command is known to be unsupported by the receiving side.
    pub fn send(&self, message: Arc<Message>) -> bool {
        if !self.is_running() {
            error!(
                "[TransportUdp] Worker is not active. Command {} will be discarded",
                self.registry.display(message.command())
            );
            return false;
        }
        if self.check_unknown && self.shared.unknown.contains(&message.command()) {
            error!(
                "[TransportUdp] Command {} is unknown for the receiving side. \
                 Command will be discarded",
                self.registry.display(message.command())
            );
            return false;
        }
        self.shared.queue.push(message);
        true
    }

    /// Cancel all queued (not yet sent) messages carrying `command`.
    pub fn remove(&self, command: Uuid) {
        let removed = self.shared.queue.remove_where(|m| m.command() == command);
        if removed > 0 {
            debug!(
                "[TransportUdp] {removed} queued messages removed; command: {}",
                self.registry.display(command)
            );
        }
    }

    /// Number of messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Replace the set of source IPs to ignore. Only datagrams arriving
    /// from our own port are dropped, which suppresses self-echo on
    /// broadcast networks without hiding real peers on the same host.
    pub fn set_discard_addresses(&self, addrs: Vec<IpAddr>) {
        *self.shared.discard.lock() = addrs;
    }

    pub fn discard_addresses(&self) -> Vec<IpAddr> {
        self.shared.discard.lock().clone()
    }

    /// Request the worker to stop and wait up to `timeout` for it to
    /// exit.
    pub async fn disconnect(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        let _ = self.cmd_tx.send(DatagramCmd::Stop);
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

/// Bind a datagram endpoint and spawn its worker.
///
/// Inbound messages arrive as [`ChannelEvent::Message`] on the returned
/// receiver; [`ChannelEvent::Disconnected`] marks worker exit. There is
/// no `Connected` event — a bound datagram socket has no peer.
pub async fn bind(
    addr: SocketAddr,
    options: ChannelOptions,
    registry: Arc<CommandRegistry>,
) -> Result<(DatagramHandle, flume::Receiver<ChannelEvent>)> {
    let socket = compio::net::UdpSocket::bind(addr).await?;
    let local_addr = socket.local_addr()?;
    debug!("[TransportUdp] Socket bound to {local_addr}");

    let (cmd_tx, cmd_rx) = flume::unbounded();
    let (event_tx, event_rx) = flume::unbounded();
    let check_unknown = options.check_unknown_commands;

    let shared = Arc::new(Shared {
        queue: PriorityQueue::new(),
        unknown: DashSet::new(),
        running: AtomicBool::new(true),
        local_addr,
        discard: Mutex::new(Vec::new()),
    });

    let worker = Endpoint {
        socket,
        shared: Arc::clone(&shared),
        registry: Arc::clone(&registry),
        event_tx,
        cmd_rx,
        internal: VecDeque::new(),
        accepted: VecDeque::new(),
        options,
    };
    let task = compio::runtime::spawn(worker.run());

    Ok((
        DatagramHandle {
            shared,
            cmd_tx,
            registry,
            check_unknown,
            _worker: Arc::new(task),
        },
        event_rx,
    ))
}

/// The worker half of one datagram endpoint.
struct Endpoint {
    socket: compio::net::UdpSocket,
    shared: Arc<Shared>,
    registry: Arc<CommandRegistry>,
    event_tx: flume::Sender<ChannelEvent>,
    cmd_rx: flume::Receiver<DatagramCmd>,
    /// Unknown-command notices awaiting transmission.
    internal: VecDeque<Arc<Message>>,
    accepted: VecDeque<Message>,
    options: ChannelOptions,
}

impl Endpoint {
    async fn run(mut self) {
        debug!(
            "[TransportUdp] Worker started; {}",
            self.shared.local_addr
        );

        loop {
            match self.cmd_rx.try_recv() {
                Ok(DatagramCmd::Stop) | Err(flume::TryRecvError::Disconnected) => break,
                Err(flume::TryRecvError::Empty) => {}
            }

            if let Err(e) = self.send_pending().await {
                error!("[TransportUdp] {e}; {}", self.shared.local_addr);
                break;
            }

            match self.recv_step().await {
                Ok(()) => {}
                Err(e) => {
                    error!("[TransportUdp] {e}; {}", self.shared.local_addr);
                    break;
                }
            }

            self.deliver_accepted();
        }

        self.shared.running.store(false, Ordering::Relaxed);
        let _ = self.event_tx.send(ChannelEvent::Disconnected(-1));
        debug!(
            "[TransportUdp] Worker stopped; {}",
            self.shared.local_addr
        );
    }

    /// One datagram per destination per queued message, under a small
    /// time budget.
    async fn send_pending(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let message = match self.internal.pop_front() {
                Some(m) => Some(m),
                None => self.shared.queue.pop_next(),
            };
            let Some(message) = message else {
                return Ok(());
            };

            if message.encoded_len() > SAFE_DATAGRAM_LEN {
                warn!(
                    "[TransportUdp] Message too large to send through a datagram \
                     socket reliably ({} bytes). The message may be lost. \
                     Command {}",
                    message.encoded_len(),
                    self.registry.display(message.command())
                );
            }

            let datagram = {
                let mut buf =
                    BytesMut::with_capacity(signature::DATAGRAM_SIGNATURE.len() + message.encoded_len());
                buf.extend_from_slice(&signature::DATAGRAM_SIGNATURE);
                buf.extend_from_slice(&message.encode());
                buf.freeze()
            };

            if !message.destination_addrs().is_empty() {
                for addr in message.destination_addrs() {
                    let BufResult(res, _) =
                        self.socket.send_to(datagram.to_vec(), *addr).await;
                    res?;
                    trace!(
                        "[TransportUdp] Message sent to {addr}; command: {}",
                        self.registry.display(message.command())
                    );
                }
            } else if let Some(addr) = message.source_addr() {
                let BufResult(res, _) = self.socket.send_to(datagram.to_vec(), addr).await;
                res?;
                trace!(
                    "[TransportUdp] Message sent to {addr}; command: {}",
                    self.registry.display(message.command())
                );
            } else {
                error!(
                    "[TransportUdp] Impossible to send message: {}. Destination \
                     address is undefined. Message will be discarded",
                    self.registry.display(message.command())
                );
            }

            if started.elapsed() >= PHASE_BUDGET {
                return Ok(());
            }
        }
    }

    /// One bounded receive; parses at most one datagram.
    async fn recv_step(&mut self) -> Result<()> {
        let poll = if self.internal.is_empty()
            && self.accepted.is_empty()
            && self.shared.queue.is_empty()
        {
            self.options.poll_interval
        } else {
            FAST_POLL
        };

        let buf = vec![0u8; RECV_BUF_LEN];
        let BufResult(res, buf) =
            match compio::time::timeout(poll, self.socket.recv_from(buf)).await {
                Ok(r) => r,
                Err(_) => return Ok(()),
            };
        let (n, source) = res?;
        let datagram = &buf[..n];

        if !signature::datagram_signed(datagram) {
            trace!(
                "[TransportUdp] Datagram with incompatible signature discarded. \
                 Source: {source}"
            );
            return Ok(());
        }

        if source.port() == self.shared.local_addr.port()
            && self.shared.discard.lock().contains(&source.ip())
        {
            trace!("[TransportUdp] Datagram discarded. Source: {source}");
            return Ok(());
        }

        let body = Bytes::copy_from_slice(&datagram[signature::DATAGRAM_SIGNATURE.len()..]);
        let mut message = match Message::decode(body) {
            Ok(message) => message,
            Err(e) => {
                // Bad datagram; the endpoint keeps running
                warn!("[TransportUdp] Dropping undecodable datagram from {source}: {e}");
                return Ok(());
            }
        };

        if self.options.check_compatibility {
            let (low, high) = message.protocol_versions();
            if !version::compatible(low, high) {
                debug!(
                    "[TransportUdp] Incompatible datagram dropped. Remote protocol \
                     version: {low}-{high}. Source: {source}"
                );
                return Ok(());
            }
        }

        message.set_transport(TransportKind::Datagram);
        message.set_source_addr(source);
        trace!(
            "[TransportUdp] Message received; command: {}; source: {source}",
            self.registry.display(message.command())
        );
        self.accepted.push_back(message);
        Ok(())
    }

    fn deliver_accepted(&mut self) {
        let started = Instant::now();
        while let Some(message) = self.accepted.pop_front() {
            if self.options.check_unknown_commands && self.intercept_unknown(&message) {
                // Handled entirely inside the endpoint
            } else if self
                .event_tx
                .send(ChannelEvent::Message(Arc::new(message)))
                .is_err()
            {
                error!(
                    "[TransportUdp] Failed to deliver message: owner side is gone; {}",
                    self.shared.local_addr
                );
            }
            if started.elapsed() >= PHASE_BUDGET {
                return;
            }
        }
    }

    fn intercept_unknown(&mut self, message: &Message) -> bool {
        if message.command() == command::UNKNOWN_COMMAND {
            match UnknownCommand::from_message(message) {
                Ok(notice) => {
                    error!(
                        "[TransportUdp] Command {} is unknown for the remote side",
                        self.registry.display(notice.command)
                    );
                    self.shared.unknown.insert(notice.command);
                }
                Err(e) => {
                    error!(
                        "[TransportUdp] Incorrect data structure for command {}: {e}",
                        self.registry.display(message.command())
                    );
                }
            }
            return true;
        }

        if !self.registry.contains(message.command()) {
            let notice = UnknownCommand::describing(message);
            error!("[TransportUdp] Unknown command: {}", notice.command);
            let mut reply = notice.to_message();
            reply.set_priority(Priority::High);
            if let Some(addr) = message.source_addr() {
                reply.add_destination_addr(addr);
            }
            self.internal.push_back(Arc::new(reply));
            return true;
        }

        false
    }
}
