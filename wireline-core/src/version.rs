//! Binary protocol version window.
//!
//! Every message carries the sender's supported version range in its header.
//! Two peers may talk only when the ranges overlap; the check runs once per
//! stream connection during the compatibility handshake, and per datagram
//! for the unconnected transport.

/// Lowest binary protocol version this build can speak
pub const PROTOCOL_VERSION_LOW: u16 = 1;

/// Highest binary protocol version this build can speak
pub const PROTOCOL_VERSION_HIGH: u16 = 2;

/// Check whether two version windows overlap.
///
/// An inverted window (`low > high`) on either side is never compatible.
#[must_use]
pub const fn windows_overlap(local: (u16, u16), remote: (u16, u16)) -> bool {
    let (local_low, local_high) = local;
    let (remote_low, remote_high) = remote;

    if remote_low > remote_high || local_low > local_high {
        return false;
    }
    if remote_high < local_low {
        return false;
    }
    if remote_low > local_high {
        return false;
    }
    true
}

/// Check a remote version window against this build's window.
#[must_use]
pub const fn compatible(remote_low: u16, remote_high: u16) -> bool {
    windows_overlap(
        (PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH),
        (remote_low, remote_high),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_windows() {
        assert!(windows_overlap((1, 3), (2, 4)));
        assert!(windows_overlap((2, 4), (1, 3)));
        assert!(windows_overlap((1, 1), (1, 1)));
        assert!(windows_overlap((1, 10), (5, 5)));
    }

    #[test]
    fn disjoint_windows() {
        assert!(!windows_overlap((1, 2), (3, 4)));
        assert!(!windows_overlap((3, 4), (1, 2)));
    }

    #[test]
    fn inverted_window_is_incompatible() {
        assert!(!windows_overlap((1, 3), (4, 2)));
        assert!(!windows_overlap((3, 1), (1, 3)));
    }

    #[test]
    fn build_window_accepts_itself() {
        assert!(compatible(PROTOCOL_VERSION_LOW, PROTOCOL_VERSION_HIGH));
    }
}
