//! Engine configuration.
//!
//! [`Options`] is a plain value: the binary fills it from the config file
//! and command line, tests build it with struct update syntax.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::user_agent::default_user_agent;

/// Default number of attempts per URL.
pub const DEFAULT_TRIES: u32 = 20;

/// Default redirect limit.
pub const DEFAULT_MAX_REDIRECT: u32 = 20;

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(900);

/// Default upper bound on the wait between retries.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(10);

/// TLS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the server certificate chain and name.
    pub check_certificate: bool,
    /// Extra trusted CA certificates (PEM).
    pub ca_file: Option<PathBuf>,
    /// Certificate revocation lists (PEM).
    pub crl_file: Option<PathBuf>,
    /// `sha256//...` digests or a path to the expected public key.
    pub pinned_public_key: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            check_certificate: true,
            ca_file: None,
            crl_file: None,
            pinned_public_key: None,
        }
    }
}

/// Everything that shapes a retrieval.
#[derive(Debug, Clone)]
pub struct Options {
    /// Attempts per URL; 0 means unlimited.
    pub tries: u32,
    /// Longest wait between attempts. Waits grow exponentially up to this.
    pub retry_wait: Duration,
    /// Add random jitter to retry waits.
    pub retry_jitter: bool,
    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    /// Bandwidth cap in bytes per second.
    pub limit_rate: Option<u64>,
    pub user_agent: String,
    pub referer: Option<String>,
    /// Extra request headers, sent after the standard ones.
    pub extra_headers: Vec<(String, String)>,
    pub http_user: Option<String>,
    pub http_password: Option<String>,
    /// Send Basic credentials before being challenged.
    pub auth_without_challenge: bool,
    /// Ask for and honor persistent connections.
    pub keep_alive: bool,
    /// Send `Cache-Control: no-cache` and `Pragma: no-cache`.
    pub no_cache: bool,
    /// Only download when the remote file is newer than the local one.
    pub timestamping: bool,
    /// With time-stamping, use a conditional GET rather than a HEAD probe.
    pub if_modified_since: bool,
    /// Resume a partial local file.
    pub continue_download: bool,
    /// Start at this byte offset regardless of the local file.
    pub start_pos: Option<u64>,
    /// Request method override.
    pub method: Option<String>,
    /// Request body, sent as form data.
    pub body_data: Option<Vec<u8>>,
    pub max_redirect: u32,
    /// Treat "connection refused" as transient.
    pub retry_connrefused: bool,
    /// HTTP status codes treated as transient.
    pub retry_on_http_error: Vec<u16>,
    /// Check that documents exist without downloading them.
    pub spider: bool,
    /// Remove downloaded files right away.
    pub delete_after: bool,
    pub bind_address: Option<IpAddr>,
    pub tls: TlsOptions,
    /// Write every document to this file.
    pub output_document: Option<PathBuf>,
    /// Directory local file names are relative to.
    pub directory_prefix: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            retry_wait: DEFAULT_RETRY_WAIT,
            retry_jitter: true,
            dns_timeout: None,
            connect_timeout: None,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            limit_rate: None,
            user_agent: default_user_agent(),
            referer: None,
            extra_headers: Vec::new(),
            http_user: None,
            http_password: None,
            auth_without_challenge: false,
            keep_alive: true,
            no_cache: false,
            timestamping: false,
            if_modified_since: true,
            continue_download: false,
            start_pos: None,
            method: None,
            body_data: None,
            max_redirect: DEFAULT_MAX_REDIRECT,
            retry_connrefused: false,
            retry_on_http_error: Vec::new(),
            spider: false,
            delete_after: false,
            bind_address: None,
            tls: TlsOptions::default(),
            output_document: None,
            directory_prefix: PathBuf::from("."),
        }
    }
}

impl Options {
    /// Sets a timeout on every network operation at once.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = Some(timeout);
        self.connect_timeout = Some(timeout);
        self.read_timeout = Some(timeout);
        self
    }

    /// The method to use for a plain retrieval.
    #[must_use]
    pub fn request_method(&self) -> &str {
        match &self.method {
            Some(method) => method,
            None if self.body_data.is_some() => "POST",
            None => "GET",
        }
    }
}
