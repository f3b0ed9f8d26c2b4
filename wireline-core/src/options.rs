//! Channel and listener configuration.

use crate::compress::clamp_level;
use std::time::Duration;

/// Configuration shared by channels and listeners.
///
/// A listener copies its options into every channel it accepts.
///
/// # Examples
///
/// ```
/// use wireline_core::options::ChannelOptions;
///
/// let opts = ChannelOptions::default()
///     .with_compression_level(6)
///     .with_compression_threshold(2048);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// zlib level applied when a whole frame is compressed before hitting
    /// the socket. 0 disables frame compression, 1..=9 pick the usual
    /// trade-off, -1 (default) uses the codec default. Values outside
    /// -1..=9 are clamped.
    pub compression_level: i32,

    /// Encoded-message size (bytes) above which frame compression kicks
    /// in. Local links (Unix sockets, loopback TCP) are never compressed.
    pub compression_threshold: usize,

    /// Verify the binary protocol version window after connecting.
    /// Disabling this treats every peer as compatible.
    pub check_compatibility: bool,

    /// Track commands the remote side reported as unknown and refuse to
    /// send them again; synthesize unknown-command notices for inbound
    /// commands missing from the registry.
    pub check_unknown_commands: bool,

    /// How long a single bounded socket wait lasts inside the worker
    /// loop. Small values keep the loop responsive to stop requests.
    pub poll_interval: Duration,

    /// How long to wait for the peer's 16-byte protocol signature.
    pub signature_timeout: Duration,

    /// Bind attempts before a listener init fails.
    pub bind_attempts: u32,

    /// How often the listener sweeps out channels whose worker exited.
    pub reap_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            compression_level: -1,
            compression_threshold: 1024,
            check_compatibility: true,
            check_unknown_commands: true,
            poll_interval: Duration::from_millis(20),
            signature_timeout: Duration::from_secs(2),
            bind_attempts: 10,
            reap_interval: Duration::from_secs(15),
        }
    }
}

impl ChannelOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame compression level (clamped to -1..=9).
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = clamp_level(level);
        self
    }

    /// Set the frame compression threshold in bytes.
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Enable or disable the version-window check.
    pub fn with_check_compatibility(mut self, enabled: bool) -> Self {
        self.check_compatibility = enabled;
        self
    }

    /// Enable or disable unknown-command tracking.
    pub fn with_check_unknown_commands(mut self, enabled: bool) -> Self {
        self.check_unknown_commands = enabled;
        self
    }

    /// Set the worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the signature exchange timeout.
    pub fn with_signature_timeout(mut self, timeout: Duration) -> Self {
        self.signature_timeout = timeout;
        self
    }

    /// Set how many bind attempts a listener makes.
    pub fn with_bind_attempts(mut self, attempts: u32) -> Self {
        self.bind_attempts = attempts.max(1);
        self
    }

    /// Set the dead-channel sweep interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ChannelOptions::default();
        assert_eq!(opts.compression_level, -1);
        assert_eq!(opts.compression_threshold, 1024);
        assert!(opts.check_compatibility);
        assert!(opts.check_unknown_commands);
        assert_eq!(opts.bind_attempts, 10);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = ChannelOptions::new()
            .with_compression_level(9)
            .with_compression_threshold(4096)
            .with_check_unknown_commands(false);
        assert_eq!(opts.compression_level, 9);
        assert_eq!(opts.compression_threshold, 4096);
        assert!(!opts.check_unknown_commands);
    }

    #[test]
    fn test_level_clamping() {
        assert_eq!(
            ChannelOptions::new().with_compression_level(99).compression_level,
            9
        );
        assert_eq!(
            ChannelOptions::new().with_compression_level(-7).compression_level,
            -1
        );
    }

    #[test]
    fn test_bind_attempts_floor() {
        assert_eq!(ChannelOptions::new().with_bind_attempts(0).bind_attempts, 1);
    }
}
