//! Per-attempt response bookkeeping.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Content codings the engine can recognize. Bodies are stored as
/// received; nothing is decompressed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Compress,
    Other(String),
}

impl ContentEncoding {
    /// Parses a `Content-Encoding` value. The last coding applied wins.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let last = value.rsplit(',').next().unwrap_or_default().trim();
        match last.to_ascii_lowercase().as_str() {
            "" | "identity" => Self::Identity,
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            "compress" | "x-compress" => Self::Compress,
            other => Self::Other(other.to_string()),
        }
    }
}

/// What one attempt learned about a response.
///
/// A fresh snapshot is used per retrieval; `len` and `restval` carry over
/// between attempts of the same retrieval so an interrupted body can be
/// resumed.
#[derive(Debug, Clone, Default)]
pub struct HttpStat {
    pub status: Option<u16>,
    pub reason: Option<String>,
    /// Bytes of the document present locally: `restval` plus what this
    /// attempt received.
    pub len: u64,
    /// Bytes received by this attempt alone.
    pub rd_size: u64,
    /// Body length the server announced, when it did.
    pub contlen: Option<u64>,
    /// Offset of the first body byte, from `Content-Range`.
    pub contrange: u64,
    /// Offset this attempt asked to resume from.
    pub restval: u64,
    pub chunked: bool,
    pub encoding: ContentEncoding,
    pub content_type: Option<String>,
    /// Raw `Location` value.
    pub location: Option<String>,
    /// Raw `Last-Modified` value.
    pub remote_time: Option<String>,
    /// Human-readable description of the last failure.
    pub error: Option<String>,
    /// Time spent streaming the body.
    pub elapsed: Duration,
    pub local_file: Option<PathBuf>,
}

impl HttpStat {
    /// Clears the per-response fields before an attempt, keeping `len`,
    /// `restval` and `local_file`.
    pub fn reset_response(&mut self) {
        self.status = None;
        self.reason = None;
        self.rd_size = 0;
        self.contlen = None;
        self.contrange = 0;
        self.chunked = false;
        self.encoding = ContentEncoding::Identity;
        self.content_type = None;
        self.location = None;
        self.remote_time = None;
        self.error = None;
        self.elapsed = Duration::ZERO;
    }

    /// `Last-Modified` as a timestamp, when it parses.
    #[must_use]
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.remote_time
            .as_deref()
            .and_then(|raw| httpdate::parse_http_date(raw.trim()).ok())
    }

    /// Full size of the document when known: announced body length plus
    /// the range offset.
    #[must_use]
    pub fn total_len(&self) -> Option<u64> {
        self.contlen.map(|len| len + self.contrange)
    }
}
