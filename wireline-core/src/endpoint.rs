//! Endpoint abstraction for transport-agnostic socket addressing.
//!
//! Provides unified addressing for TCP, Unix-domain and UDP transports with
//! parsing support.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`
    Tcp(SocketAddr),
    /// Unix-domain stream transport: `local:///path/to/socket`
    #[cfg(unix)]
    Local(PathBuf),
    /// Datagram transport: `udp://host:port`
    Udp(SocketAddr),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// Supported formats:
    /// - `tcp://127.0.0.1:5555`
    /// - `tcp://[::1]:5555` (IPv6)
    /// - `local:///tmp/socket.sock` (Unix only)
    /// - `udp://0.0.0.0:5555`
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Returns true if this is a TCP endpoint.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Endpoint::Tcp(_))
    }

    /// Returns true if this is a Unix-domain endpoint.
    #[cfg(unix)]
    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local(_))
    }

    /// Returns true if this is a datagram endpoint.
    pub fn is_udp(&self) -> bool {
        matches!(self, Endpoint::Udp(_))
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let socket_addr = addr
                .parse::<SocketAddr>()
                .map_err(|_| EndpointError::InvalidAddress(addr.to_string()))?;
            Ok(Endpoint::Tcp(socket_addr))
        } else if let Some(path) = s.strip_prefix("local://") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(EndpointError::InvalidPath(
                        "socket path cannot be empty".to_string(),
                    ));
                }
                Ok(Endpoint::Local(PathBuf::from(path)))
            }
            #[cfg(not(unix))]
            {
                Err(EndpointError::LocalNotSupported)
            }
        } else if let Some(addr) = s.strip_prefix("udp://") {
            let socket_addr = addr
                .parse::<SocketAddr>()
                .map_err(|_| EndpointError::InvalidAddress(addr.to_string()))?;
            Ok(Endpoint::Udp(socket_addr))
        } else {
            Err(EndpointError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            Endpoint::Local(path) => write!(f, "local://{}", path.display()),
            Endpoint::Udp(addr) => write!(f, "udp://{}", addr),
        }
    }
}

/// Errors that can occur when parsing or using endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid scheme in endpoint: {0} (expected tcp://, local://, or udp://)")]
    InvalidScheme(String),

    #[error("Invalid socket address: {0}")]
    InvalidAddress(String),

    #[error("Invalid socket path: {0}")]
    InvalidPath(String),

    #[error("Unix-domain transport not supported on this platform")]
    LocalNotSupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_ipv4() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
        assert!(matches!(endpoint, Endpoint::Tcp(_)));
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_parse_tcp_ipv6() {
        let endpoint = Endpoint::parse("tcp://[::1]:5555").unwrap();
        assert!(matches!(endpoint, Endpoint::Tcp(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_local() {
        let endpoint = Endpoint::parse("local:///tmp/test.sock").unwrap();
        assert!(matches!(endpoint, Endpoint::Local(_)));
        assert_eq!(endpoint.to_string(), "local:///tmp/test.sock");
    }

    #[test]
    fn test_parse_udp() {
        let endpoint = Endpoint::parse("udp://0.0.0.0:7788").unwrap();
        assert!(matches!(endpoint, Endpoint::Udp(_)));
        assert_eq!(endpoint.to_string(), "udp://0.0.0.0:7788");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = Endpoint::parse("http://127.0.0.1:5555");
        assert!(matches!(result, Err(EndpointError::InvalidScheme(_))));
    }

    #[test]
    fn test_invalid_address() {
        let result = Endpoint::parse("tcp://invalid:port");
        assert!(matches!(result, Err(EndpointError::InvalidAddress(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_local_path() {
        let result = Endpoint::parse("local://");
        assert!(matches!(result, Err(EndpointError::InvalidPath(_))));
    }
}
