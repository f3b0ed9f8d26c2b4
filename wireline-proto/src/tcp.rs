//! TCP transport adapters: outbound connector and accepting listener.

use crate::channel::{self, ChannelEvent, ChannelHandle, LinkInfo};
use crate::listener::ChannelSet;
use compio::net::{TcpListener, TcpStream};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use wireline_core::command::CommandRegistry;
use wireline_core::error::Result;
use wireline_core::message::{Descriptor, Message, TransportKind};
use wireline_core::options::ChannelOptions;
use wireline_core::tcp::{enable_tcp_nodelay, is_loopback};

fn raw_descriptor(stream: &TcpStream) -> Descriptor {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        Descriptor::from(stream.as_raw_fd())
    }
    #[cfg(not(unix))]
    {
        let _ = stream;
        -1
    }
}

/// Connect to a remote listener and spawn the connection actor.
///
/// Returns the channel handle and the event stream carrying
/// `Connected` / `Message` / `Disconnected`.
pub async fn connect(
    addr: SocketAddr,
    options: ChannelOptions,
    registry: Arc<CommandRegistry>,
) -> Result<(ChannelHandle, flume::Receiver<ChannelEvent>)> {
    debug!("[TransportTcp] Try connect: {addr}");
    let stream = TcpStream::connect(addr).await?;
    if let Err(e) = enable_tcp_nodelay(&stream) {
        warn!("[TransportTcp] Failed to set TCP_NODELAY: {e}");
    }

    let info = LinkInfo {
        transport: TransportKind::Stream,
        descriptor: raw_descriptor(&stream),
        peer_addr: Some(addr),
        peer_name: None,
        local_link: is_loopback(&addr),
    };

    let (event_tx, event_rx) = flume::unbounded();
    let handle = channel::spawn(stream, info, options, registry, event_tx);
    Ok((handle, event_rx))
}

/// Accepting side of the TCP transport.
///
/// Owns the listening socket, spawns one connection actor per accepted
/// connection, and keeps the live set bounded through a periodic reaper.
pub struct Listener {
    set: Arc<ChannelSet>,
    event_rx: flume::Receiver<ChannelEvent>,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    tasks: Option<(compio::runtime::Task<()>, compio::runtime::Task<()>)>,
}

impl Listener {
    /// Bind and start accepting.
    ///
    /// Binding retries up to `options.bind_attempts` times with a short
    /// backoff before failing.
    pub async fn bind(
        addr: SocketAddr,
        options: ChannelOptions,
        registry: Arc<CommandRegistry>,
    ) -> Result<Self> {
        let mut attempt = 0;
        let listener = loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => break listener,
                Err(e) => {
                    attempt += 1;
                    if attempt >= options.bind_attempts {
                        error!("[TransportTcp] Failed to bind {addr}: {e}");
                        return Err(e.into());
                    }
                    compio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        };
        let local_addr = listener.local_addr()?;
        debug!("[TransportTcp] Listening on {local_addr}");

        let set = Arc::new(ChannelSet::new(Arc::clone(&registry)));
        let (event_tx, event_rx) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let accept_task = {
            let set = Arc::clone(&set);
            let stop = Arc::clone(&stop);
            let options = options.clone();
            compio::runtime::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            if stop.load(Ordering::Relaxed) {
                                break;
                            }
                            if let Err(e) = enable_tcp_nodelay(&stream) {
                                warn!("[TransportTcp] Failed to set TCP_NODELAY: {e}");
                            }
                            let peer_addr = stream.peer_addr().ok();
                            let info = LinkInfo {
                                transport: TransportKind::Stream,
                                descriptor: raw_descriptor(&stream),
                                peer_addr,
                                peer_name: None,
                                local_link: peer_addr.as_ref().is_some_and(is_loopback),
                            };
                            debug!("[TransportTcp] Connection accepted; {info}");
                            let handle = channel::spawn(
                                stream,
                                info,
                                options.clone(),
                                Arc::clone(&registry),
                                event_tx.clone(),
                            );
                            set.add(handle);
                        }
                        Err(e) => {
                            if stop.load(Ordering::Relaxed) {
                                break;
                            }
                            error!("[TransportTcp] Accept failed: {e}");
                            compio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            })
        };

        let reap_task = {
            let set = Arc::clone(&set);
            let stop = Arc::clone(&stop);
            let interval = options.reap_interval;
            compio::runtime::spawn(async move {
                loop {
                    compio::time::sleep(interval).await;
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let removed = set.reap();
                    if removed > 0 {
                        debug!("[TransportTcp] {removed} finished channels reaped");
                    }
                }
            })
        };

        Ok(Self {
            set,
            event_rx,
            local_addr,
            stop,
            tasks: Some((accept_task, reap_task)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of currently running channels.
    pub fn sockets(&self) -> Vec<ChannelHandle> {
        self.set.snapshot()
    }

    /// Find a running channel by descriptor.
    pub fn socket_by_descriptor(&self, descriptor: Descriptor) -> Option<ChannelHandle> {
        self.set.by_descriptor(descriptor)
    }

    /// Route a message across the live channels (see
    /// [`ChannelSet::send`]).
    pub fn send(&self, message: Arc<Message>, exclude: &[Descriptor]) {
        self.set.send(message, exclude);
    }

    /// Event stream aggregating every accepted channel.
    pub fn events(&self) -> flume::Receiver<ChannelEvent> {
        self.event_rx.clone()
    }

    /// The live-channel registry, for direct bookkeeping.
    pub fn channel_set(&self) -> &Arc<ChannelSet> {
        &self.set
    }

    /// Stop the reaper and acceptor, stop every live channel, then drop
    /// the listening socket.
    pub async fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Cancelling the accept task drops the listening socket
        self.tasks = None;
        self.set.disconnect_all().await;
        debug!("[TransportTcp] Listener on {} closed", self.local_addr);
    }
}
