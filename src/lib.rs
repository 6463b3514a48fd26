//! Fetcher Core Library
//!
//! An HTTP/HTTPS document-retrieval engine: given a URL it resolves the
//! host, opens (or reuses) a TCP/TLS connection, sends the request,
//! interprets the response and decides whether to save the body, follow a
//! redirect, retry or fail.
//!
//! # Architecture
//!
//! - [`url`] - URL parsing, escaping and relative reference resolution
//! - [`resolver`] - Host lookup with a per-host address cache
//! - [`connect`] - TCP/TLS connections and the persistent connection slot
//! - [`http`] - Request/response handling for a single attempt
//! - [`retrieve`] - Retry loop, redirects and the URL/file registry
//! - [`session`] - State shared by the retrievals of one run
//!
//! ```no_run
//! # async fn run() -> Result<(), fetcher_core::FetchError> {
//! use fetcher_core::{Options, Session};
//!
//! let mut session = Session::new(Options::default());
//! let outcome = session.retrieve("http://example.com/index.html").await?;
//! println!("{:?}", outcome.local_file());
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connect;
pub mod error;
pub mod http;
pub mod options;
pub mod progress;
pub mod resolver;
pub mod retrieve;
pub mod session;
pub mod timer;
pub mod url;
mod user_agent;

// Re-export commonly used types
pub use error::FetchError;
pub use options::{Options, TlsOptions};
pub use progress::{NoProgress, ProgressObserver};
pub use retrieve::{ExitStatus, Outcome, Registry, retrieve_url};
pub use session::{Session, SessionStats};
pub use timer::Timer;
pub use url::Url;
pub use user_agent::default_user_agent;
