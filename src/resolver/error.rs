//! Error types for host name resolution.

use thiserror::Error;

/// Errors produced by [`HostResolver`](super::HostResolver) and
/// [`AddressList`](super::AddressList).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name does not resolve, or resolves to nothing usable.
    #[error("unable to resolve host address '{host}'")]
    NotFound {
        /// The host that failed to resolve.
        host: String,
        /// The resolver's own error, when it gave one.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The lookup did not finish within the DNS timeout.
    #[error("timed out resolving host address '{host}'")]
    Timeout {
        /// The host whose lookup timed out.
        host: String,
    },

    /// An address was marked faulty out of order. This is a caller bug.
    #[error("address {index} marked faulty while the cursor is at {cursor}")]
    FaultyIndexMismatch {
        /// The index the caller tried to mark.
        index: usize,
        /// Where the faulty cursor actually was.
        cursor: usize,
    },
}

impl ResolveError {
    /// Creates a not-found error, optionally wrapping the resolver's error.
    pub fn not_found(host: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::NotFound {
            host: host.into(),
            source,
        }
    }

    /// Creates a DNS timeout error.
    pub fn timeout(host: impl Into<String>) -> Self {
        Self::Timeout { host: host.into() }
    }
}
