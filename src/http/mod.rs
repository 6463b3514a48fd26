//! HTTP/1.x protocol engine.
//!
//! Request formatting, response head parsing, body framing and the
//! per-attempt exchange driven by [`http_attempt`].

mod auth;
mod body;
mod chunked;
mod content_range;
mod engine;
mod request;
mod response;
mod stat;

pub use auth::{AuthScheme, basic_authorization, select_scheme};
pub use body::{BodyContext, BodySink, Framing, SKIP_THRESHOLD, read_body, skip_short_body};
pub use chunked::{ChunkError, ChunkedDecoder, parse_chunk_size};
pub use content_range::{ContentRange, parse_content_range};
pub use engine::{AttemptOutcome, AttemptPlan, build_request, http_attempt, local_file_name};
pub use request::Request;
pub use response::{HTTP09_REASON, Response, StatusLine};
pub use stat::{ContentEncoding, HttpStat};
