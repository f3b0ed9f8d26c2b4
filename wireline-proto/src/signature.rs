//! Protocol signatures.
//!
//! Stream connections open with an unframed 16-byte signature exchange:
//! each side writes the constant below exactly once and verifies the
//! peer's copy bit-for-bit before trusting anything else on the wire.
//! Datagrams carry a shorter 4-byte signature on every packet instead,
//! since there is no connection to front-load the check onto.
//!
//! The values are arbitrary but frozen: changing either one cuts the
//! protocol off from every peer already deployed.

use uuid::{uuid, Uuid};
use wireline_core::error::{Result, WirelineError};

/// Length of the stream signature in bytes.
pub const SIGNATURE_LEN: usize = 16;

/// Signature exchanged once per stream connection.
pub const PROTOCOL_SIGNATURE: Uuid = uuid!("7aa4cbb5-c380-4a6e-9b3f-2d61e0f5c844");

/// Signature prefixed to every datagram.
pub const DATAGRAM_SIGNATURE: [u8; 4] = *b"WLD1";

/// The stream signature as raw bytes, ready to write.
#[must_use]
pub const fn signature_bytes() -> [u8; SIGNATURE_LEN] {
    *PROTOCOL_SIGNATURE.as_bytes()
}

/// Verify a peer's stream signature.
pub fn verify(bytes: &[u8]) -> Result<()> {
    if bytes == PROTOCOL_SIGNATURE.as_bytes() {
        Ok(())
    } else {
        Err(WirelineError::SignatureMismatch)
    }
}

/// Whether a datagram starts with the datagram signature.
#[must_use]
pub fn datagram_signed(datagram: &[u8]) -> bool {
    datagram.len() >= DATAGRAM_SIGNATURE.len() && datagram[..4] == DATAGRAM_SIGNATURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_signature_verifies() {
        assert!(verify(&signature_bytes()).is_ok());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let mut foreign = signature_bytes();
        foreign[0] ^= 0xFF;
        assert!(matches!(
            verify(&foreign),
            Err(WirelineError::SignatureMismatch)
        ));
        assert!(verify(&[]).is_err());
    }

    #[test]
    fn datagram_signature_check() {
        let mut datagram = DATAGRAM_SIGNATURE.to_vec();
        datagram.extend_from_slice(b"rest");
        assert!(datagram_signed(&datagram));
        assert!(!datagram_signed(b"WLX1rest"));
        assert!(!datagram_signed(b"WL"));
    }
}
