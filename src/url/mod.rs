//! URL model: parsing, validation, serialization and relative resolution.
//!
//! Only the four schemes in [`Scheme`] are recognized. IPv6 literals are
//! rejected at parse time. Components that end up on the wire are stored
//! percent-escaped so that re-serializing a parsed URL always produces a
//! request-equivalent string.
//!
//! # Example
//!
//! ```
//! use fetcher_core::url::{AuthMode, Url};
//!
//! let base = Url::parse("http://joe:pw@example.com/docs/index.html").unwrap();
//! let next = base.join("../img/logo.png").unwrap();
//! assert_eq!(next.full_path(), "/img/logo.png");
//! assert_eq!(
//!     next.to_string_with(AuthMode::HideBoth),
//!     "http://example.com/img/logo.png"
//! );
//! ```

mod error;
mod escape;
mod merge;
mod parse;

pub use error::UrlError;
pub use escape::{escape, reencode_escapes, unescape};
pub use merge::{maybe_prepend_scheme, merge};
pub use parse::{AuthMode, Scheme, Url};
