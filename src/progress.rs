//! Progress reporting seam for body streaming.

use std::time::Duration;

/// Receives progress events while a body is streamed.
///
/// `start` is called once per body with the resume offset and the total
/// expected size (including the offset) when known.
pub trait ProgressObserver: Send + Sync {
    fn start(&self, url: &str, restval: u64, expected: Option<u64>);
    fn advance(&self, bytes: u64);
    fn finish(&self, received: u64, elapsed: Duration);
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn start(&self, _url: &str, _restval: u64, _expected: Option<u64>) {}
    fn advance(&self, _bytes: u64) {}
    fn finish(&self, _received: u64, _elapsed: Duration) {}
}
