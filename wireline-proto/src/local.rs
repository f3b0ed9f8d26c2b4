//! Unix-domain transport adapters.
//!
//! Same protocol as TCP — signature exchange, version handshake, framed
//! messages — but over `AF_UNIX` stream sockets. Links are always local,
//! so frame compression is never applied.

#![cfg(unix)]

use crate::channel::{self, ChannelEvent, ChannelHandle, LinkInfo};
use crate::listener::ChannelSet;
use compio::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use wireline_core::command::CommandRegistry;
use wireline_core::error::Result;
use wireline_core::message::{Descriptor, Message, TransportKind};
use wireline_core::options::ChannelOptions;

fn raw_descriptor(stream: &UnixStream) -> Descriptor {
    use std::os::unix::io::AsRawFd;
    Descriptor::from(stream.as_raw_fd())
}

fn link_info(stream: &UnixStream, path: &Path) -> LinkInfo {
    LinkInfo {
        transport: TransportKind::Local,
        descriptor: raw_descriptor(stream),
        peer_addr: None,
        peer_name: Some(path.display().to_string()),
        local_link: true,
    }
}

/// Connect to a Unix-domain listener and spawn the connection actor.
pub async fn connect<P: AsRef<Path>>(
    path: P,
    options: ChannelOptions,
    registry: Arc<CommandRegistry>,
) -> Result<(ChannelHandle, flume::Receiver<ChannelEvent>)> {
    let path = path.as_ref();
    debug!("[TransportLocal] Try connect: {}", path.display());
    let stream = UnixStream::connect(path).await?;

    let info = link_info(&stream, path);
    let (event_tx, event_rx) = flume::unbounded();
    let handle = channel::spawn(stream, info, options, registry, event_tx);
    Ok((handle, event_rx))
}

/// Accepting side of the Unix-domain transport.
pub struct Listener {
    set: Arc<ChannelSet>,
    event_rx: flume::Receiver<ChannelEvent>,
    path: PathBuf,
    stop: Arc<AtomicBool>,
    tasks: Option<(compio::runtime::Task<()>, compio::runtime::Task<()>)>,
}

impl Listener {
    /// Bind the socket path and start accepting.
    ///
    /// A stale socket file from a previous run is removed first.
    pub async fn bind<P: AsRef<Path>>(
        path: P,
        options: ChannelOptions,
        registry: Arc<CommandRegistry>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut attempt = 0;
        let listener = loop {
            match UnixListener::bind(&path).await {
                Ok(listener) => break listener,
                Err(e) => {
                    attempt += 1;
                    if attempt >= options.bind_attempts {
                        error!(
                            "[TransportLocal] Failed to bind {}: {e}",
                            path.display()
                        );
                        return Err(e.into());
                    }
                    compio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        };
        debug!("[TransportLocal] Listening on {}", path.display());

        let set = Arc::new(ChannelSet::new(Arc::clone(&registry)));
        let (event_tx, event_rx) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let accept_task = {
            let set = Arc::clone(&set);
            let stop = Arc::clone(&stop);
            let options = options.clone();
            let path = path.clone();
            compio::runtime::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            if stop.load(Ordering::Relaxed) {
                                break;
                            }
                            let info = link_info(&stream, &path);
                            debug!("[TransportLocal] Connection accepted; {info}");
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
                            error!("[TransportLocal] Accept failed: {e}");
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
                        debug!("[TransportLocal] {removed} finished channels reaped");
                    }
                }
            })
        };

        Ok(Self {
            set,
            event_rx,
            path,
            stop,
            tasks: Some((accept_task, reap_task)),
        })
    }

    /// Socket path the listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
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

    /// Stop the reaper and acceptor, stop every live channel, then
    /// remove the socket file.
    pub async fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.tasks = None;
        self.set.disconnect_all().await;
        let _ = std::fs::remove_file(&self.path);
        debug!("[TransportLocal] Listener on {} closed", self.path.display());
    }
}
