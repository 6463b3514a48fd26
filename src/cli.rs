//! CLI argument definitions using clap derive macros.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use fetcher_core::options::{DEFAULT_MAX_REDIRECT, DEFAULT_RETRY_WAIT, DEFAULT_TRIES};
use fetcher_core::{Options, TlsOptions};

use crate::app_config::FileConfig;

/// Retrieve documents over HTTP and HTTPS.
///
/// Fetcher downloads each URL to a local file, resuming partial
/// downloads, following redirects and reusing connections.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to retrieve; `host/path` shorthand means `http://host/path`
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Attempts per URL, 0 for unlimited [default: 20]
    #[arg(short = 't', long)]
    pub tries: Option<u32>,

    /// Longest wait between attempts in seconds [default: 10]
    #[arg(long = "waitretry", value_name = "SECONDS")]
    pub retry_wait: Option<u64>,

    /// Wait exactly the backoff delay, without random jitter
    #[arg(long)]
    pub no_retry_jitter: bool,

    /// Set DNS, connect and read timeouts at once, in seconds
    #[arg(short = 'T', long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    pub dns_timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    pub read_timeout: Option<u64>,

    /// Limit download speed, in bytes per second; `k` and `m` suffixes allowed
    #[arg(long, value_name = "RATE", value_parser = parse_rate)]
    pub limit_rate: Option<u64>,

    #[arg(short = 'U', long)]
    pub user_agent: Option<String>,

    #[arg(long)]
    pub referer: Option<String>,

    /// Extra request header, `Name: value`; may be repeated
    #[arg(long = "header", value_name = "HEADER", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    #[arg(long)]
    pub http_user: Option<String>,

    #[arg(long)]
    pub http_password: Option<String>,

    /// Send Basic credentials without waiting for a challenge
    #[arg(long)]
    pub auth_no_challenge: bool,

    /// Open a new connection for every request
    #[arg(long)]
    pub no_http_keep_alive: bool,

    /// Ask caches for a fresh copy
    #[arg(long)]
    pub no_cache: bool,

    /// Only retrieve files newer than the local copy
    #[arg(short = 'N', long)]
    pub timestamping: bool,

    /// With -N, probe with HEAD instead of a conditional GET
    #[arg(long)]
    pub no_if_modified_since: bool,

    /// Resume a partially downloaded file
    #[arg(short = 'c', long = "continue")]
    pub continue_download: bool,

    /// Start downloading at this byte offset
    #[arg(long, value_name = "OFFSET")]
    pub start_pos: Option<u64>,

    #[arg(long)]
    pub method: Option<String>,

    /// Send this string as the request body
    #[arg(long, value_name = "STRING")]
    pub body_data: Option<String>,

    /// Redirects to follow per URL [default: 20]
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=1000))]
    pub max_redirect: Option<u32>,

    /// Retry when the connection is refused
    #[arg(long)]
    pub retry_connrefused: bool,

    /// Comma-separated HTTP status codes to retry on
    #[arg(long, value_delimiter = ',', value_name = "CODES")]
    pub retry_on_http_error: Vec<u16>,

    /// Check that the documents exist without downloading them
    #[arg(long)]
    pub spider: bool,

    /// Delete each file after downloading it
    #[arg(long)]
    pub delete_after: bool,

    #[arg(long, value_name = "ADDRESS")]
    pub bind_address: Option<IpAddr>,

    /// Do not validate the server certificate
    #[arg(long)]
    pub no_check_certificate: bool,

    /// Extra trusted CA certificates, PEM
    #[arg(long, value_name = "FILE")]
    pub ca_certificate: Option<PathBuf>,

    /// Certificate revocation lists, PEM
    #[arg(long, value_name = "FILE")]
    pub crl_file: Option<PathBuf>,

    /// Expected server public key: a file or `sha256//` digests
    #[arg(long, value_name = "KEY")]
    pub pinnedpubkey: Option<String>,

    /// Write every document to FILE
    #[arg(short = 'O', long, value_name = "FILE")]
    pub output_document: Option<PathBuf>,

    /// Save files under DIR
    #[arg(short = 'P', long, value_name = "DIR")]
    pub directory_prefix: Option<PathBuf>,
}

impl Args {
    /// Builds engine options from the arguments, falling back to `file`
    /// and then to the built-in defaults.
    pub fn to_options(&self, file: Option<&FileConfig>) -> Result<Options> {
        let file = file.cloned().unwrap_or_default();
        let defaults = Options::default();
        let secs = |value: Option<u64>| value.map(Duration::from_secs);

        let timeout = secs(self.timeout);
        let dns_timeout = secs(self.dns_timeout)
            .or(timeout)
            .or(secs(file.dns_timeout_secs))
            .or(defaults.dns_timeout);
        let connect_timeout = secs(self.connect_timeout)
            .or(timeout)
            .or(secs(file.connect_timeout_secs))
            .or(defaults.connect_timeout);
        let read_timeout = secs(self.read_timeout)
            .or(timeout)
            .or(secs(file.read_timeout_secs))
            .or(defaults.read_timeout);

        if self.method.as_deref().is_some_and(|method| method.trim().is_empty()) {
            anyhow::bail!("--method must not be empty");
        }

        Ok(Options {
            tries: self.tries.or(file.tries).unwrap_or(DEFAULT_TRIES),
            retry_wait: secs(self.retry_wait)
                .or(secs(file.retry_wait_secs))
                .unwrap_or(DEFAULT_RETRY_WAIT),
            retry_jitter: !self.no_retry_jitter,
            dns_timeout,
            connect_timeout,
            read_timeout,
            limit_rate: self.limit_rate.or(file.limit_rate),
            user_agent: self
                .user_agent
                .clone()
                .or(file.user_agent)
                .unwrap_or(defaults.user_agent),
            referer: self.referer.clone(),
            extra_headers: self.headers.clone(),
            http_user: self.http_user.clone(),
            http_password: self.http_password.clone(),
            auth_without_challenge: self.auth_no_challenge,
            keep_alive: !self.no_http_keep_alive && file.keep_alive.unwrap_or(true),
            no_cache: self.no_cache,
            timestamping: self.timestamping || file.timestamping.unwrap_or(false),
            if_modified_since: !self.no_if_modified_since,
            continue_download: self.continue_download,
            start_pos: self.start_pos,
            method: self.method.as_ref().map(|method| method.to_ascii_uppercase()),
            body_data: self.body_data.as_ref().map(|body| body.clone().into_bytes()),
            max_redirect: self
                .max_redirect
                .or(file.max_redirect)
                .unwrap_or(DEFAULT_MAX_REDIRECT),
            retry_connrefused: self.retry_connrefused || file.retry_connrefused.unwrap_or(false),
            retry_on_http_error: self.retry_on_http_error.clone(),
            spider: self.spider,
            delete_after: self.delete_after,
            bind_address: self.bind_address,
            tls: TlsOptions {
                check_certificate: !self.no_check_certificate
                    && file.check_certificate.unwrap_or(true),
                ca_file: self.ca_certificate.clone().or(file.ca_certificate),
                crl_file: self.crl_file.clone(),
                pinned_public_key: self.pinnedpubkey.clone(),
            },
            output_document: self.output_document.clone(),
            directory_prefix: self
                .directory_prefix
                .clone()
                .or(file.directory_prefix)
                .unwrap_or(defaults.directory_prefix),
        })
    }
}

/// Parses a rate such as `500`, `20k` or `1.5m` into bytes per second.
pub fn parse_rate(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let (number, multiplier) = match text.char_indices().last() {
        Some((index, 'k' | 'K')) => (&text[..index], 1024.0),
        Some((index, 'm' | 'M')) => (&text[..index], 1024.0 * 1024.0),
        _ => (text, 1.0),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate '{text}'"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("rate must be positive, got '{text}'"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (value * multiplier).round() as u64;
    Ok(bytes.max(1))
}

/// Parses `Name: value`.
fn parse_header(text: &str) -> Result<(String, String), String> {
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{text}'"))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("invalid header name in '{text}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
