//! What a retrieval ends with.

use std::path::PathBuf;
use std::time::Duration;

/// A successful end of a retrieval (or of one redirect hop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The document was transferred.
    Retrieved {
        /// Where it was saved; `None` when the body was discarded.
        local_file: Option<PathBuf>,
        /// Bytes of the document now held locally, resumed part included.
        len: u64,
        /// Bytes received by the final attempt.
        received: u64,
        elapsed: Duration,
        status: u16,
    },
    /// The local copy is already up to date or complete.
    Unneeded { local_file: Option<PathBuf> },
    /// The server redirected. Only seen when redirects are not followed.
    NewLocation { location: String, keep_method: bool },
    /// Spider mode: the document exists.
    RemoteExists { status: u16 },
}

impl Outcome {
    /// The local file the retrieval left behind, if any.
    #[must_use]
    pub fn local_file(&self) -> Option<&std::path::Path> {
        match self {
            Self::Retrieved { local_file, .. } | Self::Unneeded { local_file } => {
                local_file.as_deref()
            }
            Self::NewLocation { .. } | Self::RemoteExists { .. } => None,
        }
    }
}

/// Process exit codes for the command-line wrapper.
///
/// Codes group failures by class rather than naming each one. When the
/// tries run out the last transient failure decides the code, so there is
/// no separate "tries exhausted" status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Success = 0,
    /// Internal errors.
    Generic = 1,
    /// Unparsable or unsupported URLs.
    Parse = 2,
    /// Local file errors.
    Io = 3,
    /// Host not found, DNS timeout, connect impossible, read and write
    /// failures.
    Network = 4,
    Ssl = 5,
    Auth = 6,
    /// Malformed responses, range errors and redirect failures.
    Protocol = 7,
    /// Gateway timeout and other error statuses.
    Server = 8,
}

impl ExitStatus {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// The most significant of two statuses; lower non-zero codes win, as
    /// a run with several URLs reports its most basic failure.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Success, other) => other,
            (current, Self::Success) => current,
            (current, other) if other.code() < current.code() => other,
            (current, _) => current,
        }
    }
}
