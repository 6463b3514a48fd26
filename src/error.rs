//! Retrieval failures.
//!
//! Every way a retrieval can end badly is a [`FetchError`] variant. The
//! split between transient and fatal failures drives the retry loop:
//! transient failures are retried with the connection rebuilt, fatal ones
//! end the retrieval at once.

use std::path::PathBuf;

use thiserror::Error;

use crate::connect::ConnectError;
use crate::http::ChunkError;
use crate::resolver::ResolveError;
use crate::retrieve::ExitStatus;
use crate::url::UrlError;

/// Why a retrieval failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlError,
    },

    /// The URL parsed but is not something this engine retrieves.
    #[error("unsupported scheme in '{url}'")]
    UnsupportedScheme { url: String },

    #[error("unable to resolve host address '{host}'")]
    HostNotFound {
        host: String,
        #[source]
        source: ResolveError,
    },

    #[error("timed out resolving host address '{host}'")]
    DnsTimeout { host: String },

    /// The connect failed in a way retrying will not fix.
    #[error("connecting to {host} failed: {source}")]
    ConnectImpossible {
        host: String,
        #[source]
        source: ConnectError,
    },

    #[error("connecting to {host} failed: {source}")]
    ConnectFailed {
        host: String,
        #[source]
        source: ConnectError,
    },

    #[error("TLS initialization failed: {reason}")]
    SslInit { reason: String },

    #[error("TLS error with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: ConnectError,
    },

    #[error("failed writing HTTP request to {url}: {source}")]
    Write {
        url: String,
        #[source]
        source: ConnectError,
    },

    #[error("read error at byte {received} of {url}: {source}")]
    Read {
        url: String,
        received: u64,
        #[source]
        source: ConnectError,
    },

    #[error("no data received from {url}")]
    NoData { url: String },

    #[error("malformed status line from {url}: '{line}'")]
    MalformedStatusLine { url: String, line: String },

    #[error("malformed chunked body from {url}: {source}")]
    MalformedChunk {
        url: String,
        #[source]
        source: ChunkError,
    },

    #[error("connection to {url} closed at byte {received} of {expected}")]
    ShortRead {
        url: String,
        received: u64,
        expected: u64,
    },

    /// The server answered a range request with a different range.
    #[error("asked {url} for bytes from {requested}, got bytes from {offered}")]
    RangeMismatch {
        url: String,
        requested: u64,
        offered: u64,
    },

    #[error("range from byte {restval} not satisfiable for {url} of {total} bytes")]
    RangeNotSatisfiable { url: String, restval: u64, total: u64 },

    #[error("{url} does not support resuming; refusing to truncate the existing file")]
    ContinueNotSupported { url: String },

    #[error("gateway timeout from {url}")]
    GatewayTimeout { url: String },

    #[error("HTTP {status} {reason} from {url}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
        /// Configured as worth retrying.
        retryable: bool,
    },

    #[error("authentication failed for {url}: {reason}")]
    AuthFailed { url: String, reason: String },

    #[error("HTTP {status} redirect from {url} without a Location")]
    RedirectWithoutLocation { url: String, status: u16 },

    #[error("{limit} redirections exceeded at {url}")]
    TooManyRedirects { url: String, limit: u32 },

    #[error("cannot open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write to {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot remove {path}: {source}")]
    Unlink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An internal invariant was broken.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl FetchError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, source: UrlError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            source,
        }
    }

    /// Creates a read error carrying how far the body got.
    pub fn read(url: impl Into<String>, received: u64, source: ConnectError) -> Self {
        Self::Read {
            url: url.into(),
            received,
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(
        url: impl Into<String>,
        status: u16,
        reason: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            reason: reason.into(),
            retryable,
        }
    }

    /// Creates an authentication failure.
    pub fn auth_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Classifies a failure to open a connection to `host`.
    ///
    /// `retry_refused` makes "connection refused" transient.
    pub fn from_connect(host: &str, err: ConnectError, retry_refused: bool) -> Self {
        let host = host.to_string();
        match err {
            ConnectError::Resolve(ResolveError::Timeout { .. }) => Self::DnsTimeout { host },
            ConnectError::Resolve(ResolveError::FaultyIndexMismatch { .. }) => {
                Self::internal(err.to_string())
            }
            ConnectError::Resolve(source) => Self::HostNotFound { host, source },
            ConnectError::TlsInit { reason } => Self::SslInit { reason },
            ConnectError::Handshake { .. } => Self::Tls { host, source: err },
            ConnectError::ReadTimeout | ConnectError::Read { .. } | ConnectError::Closed => {
                Self::ConnectFailed { host, source: err }
            }
            _ if err.is_retryable_connect(retry_refused) => {
                Self::ConnectFailed { host, source: err }
            }
            _ => Self::ConnectImpossible { host, source: err },
        }
    }

    /// Whether retrying cannot help.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DnsTimeout { .. }
            | Self::ConnectFailed { .. }
            | Self::Write { .. }
            | Self::Read { .. }
            | Self::NoData { .. }
            | Self::MalformedStatusLine { .. }
            | Self::ShortRead { .. }
            | Self::RangeMismatch { .. }
            | Self::GatewayTimeout { .. } => false,
            Self::HttpStatus { retryable, .. } => !retryable,
            Self::InvalidUrl { .. }
            | Self::UnsupportedScheme { .. }
            | Self::HostNotFound { .. }
            | Self::ConnectImpossible { .. }
            | Self::SslInit { .. }
            | Self::Tls { .. }
            | Self::MalformedChunk { .. }
            | Self::RangeNotSatisfiable { .. }
            | Self::ContinueNotSupported { .. }
            | Self::AuthFailed { .. }
            | Self::RedirectWithoutLocation { .. }
            | Self::TooManyRedirects { .. }
            | Self::FileOpen { .. }
            | Self::FileWrite { .. }
            | Self::Unlink { .. }
            | Self::Internal { .. } => true,
        }
    }

    /// The process exit status this failure maps to.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::InvalidUrl { .. } | Self::UnsupportedScheme { .. } => ExitStatus::Parse,
            Self::FileOpen { .. } | Self::FileWrite { .. } | Self::Unlink { .. } => {
                ExitStatus::Io
            }
            Self::HostNotFound { .. }
            | Self::DnsTimeout { .. }
            | Self::ConnectImpossible { .. }
            | Self::ConnectFailed { .. }
            | Self::Write { .. }
            | Self::Read { .. }
            | Self::NoData { .. }
            | Self::ShortRead { .. } => ExitStatus::Network,
            Self::SslInit { .. } | Self::Tls { .. } => ExitStatus::Ssl,
            Self::AuthFailed { .. } => ExitStatus::Auth,
            Self::MalformedStatusLine { .. }
            | Self::MalformedChunk { .. }
            | Self::RangeMismatch { .. }
            | Self::RangeNotSatisfiable { .. }
            | Self::ContinueNotSupported { .. }
            | Self::RedirectWithoutLocation { .. }
            | Self::TooManyRedirects { .. } => ExitStatus::Protocol,
            Self::GatewayTimeout { .. } | Self::HttpStatus { .. } => ExitStatus::Server,
            Self::Internal { .. } => ExitStatus::Generic,
        }
    }
}
