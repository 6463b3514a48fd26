//! Error types for the connection layer.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::resolver::ResolveError;

/// Errors raised while opening, using or caching a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host name could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The operating system refused or failed the TCP connect.
    #[error("connecting to {addr} failed: {source}")]
    Connect {
        /// The address that was tried.
        addr: SocketAddr,
        /// The socket error.
        #[source]
        source: io::Error,
    },

    /// The TCP connect did not finish in time.
    #[error("connecting to {addr} timed out")]
    ConnectTimeout {
        /// The address that was tried.
        addr: SocketAddr,
    },

    /// The local bind address could not be used.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The configured bind address.
        addr: SocketAddr,
        /// The socket error.
        #[source]
        source: io::Error,
    },

    /// The TLS client configuration could not be built.
    #[error("TLS initialization failed: {reason}")]
    TlsInit {
        /// What went wrong.
        reason: String,
    },

    /// The TLS handshake or certificate verification failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        /// The host the handshake was for.
        host: String,
        /// The TLS error, surfaced through the stream as an I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading from the connection failed.
    #[error("read error: {source}")]
    Read {
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing to the connection failed.
    #[error("write error: {source}")]
    Write {
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// No data arrived within the read timeout.
    #[error("read timed out")]
    ReadTimeout,

    /// The peer closed the connection before sending anything.
    #[error("connection closed by peer")]
    Closed,

    /// A response head or line exceeded its size limit.
    #[error("{what} exceeds {limit} bytes")]
    TooLarge {
        /// What was being read.
        what: &'static str,
        /// The limit in bytes.
        limit: usize,
    },
}

impl ConnectError {
    /// Creates a connect error for `addr`.
    pub fn connect(addr: SocketAddr, source: io::Error) -> Self {
        Self::Connect { addr, source }
    }

    /// Creates a TLS configuration error.
    pub fn tls_init(reason: impl Into<String>) -> Self {
        Self::TlsInit {
            reason: reason.into(),
        }
    }

    /// Creates a TLS handshake error.
    pub fn handshake(host: impl Into<String>, source: io::Error) -> Self {
        Self::Handshake {
            host: host.into(),
            source,
        }
    }

    /// Creates a read error.
    pub fn read(source: io::Error) -> Self {
        Self::Read { source }
    }

    /// Creates a write error.
    pub fn write(source: io::Error) -> Self {
        Self::Write { source }
    }

    /// Whether a failed TCP connect is worth retrying.
    ///
    /// Refused connections are not, unless the caller opts in; neither are
    /// errors caused by local misconfiguration.
    #[must_use]
    pub fn is_retryable_connect(&self, retry_refused: bool) -> bool {
        match self {
            Self::Connect { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => retry_refused,
                io::ErrorKind::InvalidInput
                | io::ErrorKind::Unsupported
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::PermissionDenied => false,
                _ => true,
            },
            Self::ConnectTimeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    #[test]
    fn test_refused_is_retryable_only_on_request() {
        let err = ConnectError::connect(addr(), io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!err.is_retryable_connect(false));
        assert!(err.is_retryable_connect(true));
    }

    #[test]
    fn test_reset_and_timeout_are_retryable() {
        let reset = ConnectError::connect(addr(), io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_retryable_connect(false));
        assert!(ConnectError::ConnectTimeout { addr: addr() }.is_retryable_connect(false));
    }

    #[test]
    fn test_display_mentions_address() {
        let err = ConnectError::ConnectTimeout { addr: addr() };
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}
