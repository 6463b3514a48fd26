//! Error types for URL parsing.

use thiserror::Error;

/// Errors that can occur while parsing a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// The URL has no `scheme://` prefix at all.
    #[error("scheme missing")]
    MissingScheme,

    /// The scheme is syntactically valid but not one we handle.
    #[error("unsupported scheme '{scheme}'")]
    UnsupportedScheme {
        /// The scheme as written in the input.
        scheme: String,
    },

    /// Nothing between `//` and the path.
    #[error("empty host name")]
    EmptyHost,

    /// The host decodes to something that can't be a host name.
    #[error("invalid host name '{host}'")]
    InvalidHost {
        /// The offending host, after percent-decoding.
        host: String,
    },

    /// A `[` opened an IPv6 literal that never closed.
    #[error("unterminated IPv6 numeric address")]
    UnterminatedIpv6,

    /// IPv6 literals are rejected outright.
    #[error("IPv6 addresses not supported")]
    Ipv6NotSupported,

    /// The port is empty-but-not-absent, non-numeric, zero, or too large.
    #[error("bad port number '{port}'")]
    BadPort {
        /// The port text as written.
        port: String,
    },
}
