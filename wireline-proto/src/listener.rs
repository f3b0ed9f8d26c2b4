//! Live-channel registry shared by the stream listeners.
//!
//! The TCP and Unix-domain listeners both own a [`ChannelSet`]: a
//! mutex-guarded collection of channel handles that supports
//! address-agnostic fan-out send, descriptor lookup, and reaping of
//! channels whose worker has exited.

use crate::channel::ChannelHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};
use wireline_core::command::CommandRegistry;
use wireline_core::message::{Descriptor, Message, MessageKind};

/// Registry of the channels spawned by one listener.
pub struct ChannelSet {
    channels: Mutex<Vec<ChannelHandle>>,
    registry: Arc<CommandRegistry>,
}

impl ChannelSet {
    #[must_use]
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            registry,
        }
    }

    /// Register a channel. Re-registering the same descriptor is a
    /// no-op.
    pub fn add(&self, handle: ChannelHandle) {
        let mut channels = self.channels.lock();
        if channels
            .iter()
            .any(|c| c.descriptor() == handle.descriptor())
        {
            return;
        }
        channels.push(handle);
    }

    /// Unregister and return the channel with this descriptor.
    pub fn release(&self, descriptor: Descriptor) -> Option<ChannelHandle> {
        let mut channels = self.channels.lock();
        let index = channels.iter().position(|c| c.descriptor() == descriptor)?;
        Some(channels.swap_remove(index))
    }

    /// Snapshot of the channels whose worker is still running.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChannelHandle> {
        self.channels
            .lock()
            .iter()
            .filter(|c| c.is_running())
            .cloned()
            .collect()
    }

    /// Find a running channel by its descriptor.
    #[must_use]
    pub fn by_descriptor(&self, descriptor: Descriptor) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .iter()
            .find(|c| c.is_running() && c.descriptor() == descriptor)
            .cloned()
    }

    /// Drop every channel whose worker has exited. Returns how many were
    /// removed.
    pub fn reap(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(ChannelHandle::is_running);
        before - channels.len()
    }

    /// Number of registered channels, running or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Route a message across the live channels.
    ///
    /// `Event` messages broadcast to every live channel not listed in
    /// `exclude`. Anything else goes to the channels matching the
    /// message's destination descriptors, falling back to its source
    /// descriptor; with no match the message is logged and discarded.
    pub fn send(&self, message: Arc<Message>, exclude: &[Descriptor]) {
        let channels = self.snapshot();

        if message.kind() == MessageKind::Event {
            for channel in channels
                .iter()
                .filter(|c| !exclude.contains(&c.descriptor()))
            {
                channel.send(Arc::clone(&message));
            }
            return;
        }

        let destinations = message.destination_descriptors();
        if !destinations.is_empty() {
            let mut sent = false;
            for channel in channels
                .iter()
                .filter(|c| destinations.contains(&c.descriptor()))
            {
                channel.send(Arc::clone(&message));
                sent = true;
            }
            if !sent {
                error!(
                    "[ChannelSet] Impossible to send message: {}. No channels with \
                     descriptors {destinations:?}. Message will be discarded",
                    self.registry.display(message.command())
                );
            }
        } else if message.descriptor() != -1 {
            match channels
                .iter()
                .find(|c| c.descriptor() == message.descriptor())
            {
                Some(channel) => {
                    channel.send(message);
                }
                None => {
                    error!(
                        "[ChannelSet] Impossible to send message: {}. No channel with \
                         descriptor {}. Message will be discarded",
                        self.registry.display(message.command()),
                        message.descriptor()
                    );
                }
            }
        } else {
            error!(
                "[ChannelSet] Impossible to send message: {}. Destination descriptors \
                 are undefined. Message will be discarded",
                self.registry.display(message.command())
            );
        }
    }

    /// Stop every live channel, waiting up to five seconds each.
    pub(crate) async fn disconnect_all(&self) {
        for channel in self.snapshot() {
            if !channel
                .disconnect(std::time::Duration::from_secs(5))
                .await
            {
                debug!(
                    "[ChannelSet] Channel did not stop in time; {}",
                    channel.info()
                );
            }
        }
    }
}
