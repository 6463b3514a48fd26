//! Response body streaming.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use super::chunked::ChunkedDecoder;
use super::stat::HttpStat;
use crate::FetchError;
use crate::connect::{ConnectError, Connection};
use crate::progress::ProgressObserver;
use crate::timer::Timer;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bodies up to this size are read and thrown away so the connection can
/// be reused; longer ones are abandoned with the connection.
pub const SKIP_THRESHOLD: u64 = 4096;

/// Shortest throttling sleep worth taking.
const MIN_THROTTLE_SLEEP: Duration = Duration::from_millis(200);

/// Largest correction carried from one throttling sleep to the next.
const MAX_SLEEP_ADJUST: f64 = 0.5;

/// How the body's end is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all (HEAD, 204, 304).
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

/// Where body bytes go.
#[derive(Debug)]
pub enum BodySink {
    File {
        file: tokio::fs::File,
        path: PathBuf,
    },
    Discard,
}

impl BodySink {
    /// Opens `path` for writing, appending when `append` is set and
    /// truncating otherwise.
    ///
    /// # Errors
    ///
    /// [`FetchError::FileOpen`].
    pub async fn open(path: &Path, append: bool) -> Result<Self, FetchError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options
            .open(path)
            .await
            .map_err(|source| FetchError::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::File {
            file,
            path: path.to_path_buf(),
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), FetchError> {
        match self {
            Self::File { file, path } => {
                file.write_all(data)
                    .await
                    .map_err(|e| FetchError::file_write(path.clone(), e))?;
                file.flush()
                    .await
                    .map_err(|e| FetchError::file_write(path.clone(), e))
            }
            Self::Discard => Ok(()),
        }
    }
}

/// Everything body streaming needs besides the connection and sink.
pub struct BodyContext<'a> {
    pub url: &'a str,
    pub limit_rate: Option<u64>,
    pub progress: &'a Arc<dyn ProgressObserver>,
}

/// Keeps the average transfer rate at or below the limit by sleeping.
#[derive(Debug)]
struct Throttle {
    rate: u64,
    chunk_bytes: u64,
    chunk_start: Duration,
    sleep_adjust: f64,
}

impl Throttle {
    fn new(rate: u64) -> Self {
        Self {
            rate: rate.max(1),
            chunk_bytes: 0,
            chunk_start: Duration::ZERO,
            sleep_adjust: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    async fn limit(&mut self, bytes: u64, timer: &mut Timer) {
        let delta = timer.measure().saturating_sub(self.chunk_start).as_secs_f64();
        self.chunk_bytes += bytes;
        let expected = self.chunk_bytes as f64 / self.rate as f64;

        if expected > delta {
            let wanted = expected - delta + self.sleep_adjust;
            if wanted < MIN_THROTTLE_SLEEP.as_secs_f64() {
                return;
            }
            trace!(sleep_secs = wanted, "throttling");
            let before = timer.measure();
            tokio::time::sleep(Duration::from_secs_f64(wanted)).await;
            let slept = timer.measure().saturating_sub(before).as_secs_f64();
            self.sleep_adjust = (wanted - slept).clamp(-MAX_SLEEP_ADJUST, MAX_SLEEP_ADJUST);
        }
        self.chunk_bytes = 0;
        self.chunk_start = timer.read();
    }
}

struct Streamer<'a, 'b> {
    sink: &'a mut BodySink,
    stat: &'a mut HttpStat,
    ctx: &'a BodyContext<'b>,
    timer: Timer,
    throttle: Option<Throttle>,
}

impl Streamer<'_, '_> {
    async fn deliver(&mut self, data: &[u8]) -> Result<(), FetchError> {
        if data.is_empty() {
            return Ok(());
        }
        self.sink.write(data).await?;
        let n = data.len() as u64;
        self.stat.rd_size += n;
        self.stat.len += n;
        self.ctx.progress.advance(n);
        if let Some(throttle) = self.throttle.as_mut() {
            throttle.limit(n, &mut self.timer).await;
        }
        Ok(())
    }

    fn read_error(&self, source: ConnectError) -> FetchError {
        FetchError::read(self.ctx.url, self.stat.len, source)
    }

    fn buffer_size(&self) -> usize {
        match self.ctx.limit_rate {
            Some(rate) => usize::try_from(rate).unwrap_or(BUFFER_SIZE).clamp(1, BUFFER_SIZE),
            None => BUFFER_SIZE,
        }
    }

    async fn by_length(&mut self, conn: &mut Connection, length: u64) -> Result<(), FetchError> {
        let mut buf = vec![0u8; self.buffer_size()];
        let mut remaining = length;
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            let n = conn
                .read(&mut buf[..want])
                .await
                .map_err(|e| self.read_error(e))?;
            if n == 0 {
                return Err(FetchError::ShortRead {
                    url: self.ctx.url.to_string(),
                    received: self.stat.len,
                    expected: self.stat.len + remaining,
                });
            }
            self.deliver(&buf[..n]).await?;
            remaining -= n as u64;
        }
        Ok(())
    }

    async fn until_close(&mut self, conn: &mut Connection) -> Result<(), FetchError> {
        let mut buf = vec![0u8; self.buffer_size()];
        loop {
            let n = conn.read(&mut buf).await.map_err(|e| self.read_error(e))?;
            if n == 0 {
                return Ok(());
            }
            self.deliver(&buf[..n]).await?;
        }
    }

    async fn chunked(&mut self, conn: &mut Connection) -> Result<(), FetchError> {
        let mut decoder = ChunkedDecoder::new();
        let mut peeked = vec![0u8; self.buffer_size()];
        let mut decoded = Vec::with_capacity(peeked.len());
        while !decoder.is_done() {
            let n = conn
                .peek(&mut peeked)
                .await
                .map_err(|e| self.read_error(e))?;
            if n == 0 {
                return Err(self.read_error(ConnectError::Closed));
            }
            let used = decoder
                .feed(&peeked[..n], &mut decoded)
                .map_err(|source| FetchError::MalformedChunk {
                    url: self.ctx.url.to_string(),
                    source,
                })?;
            conn.consume(used, None)
                .await
                .map_err(|e| self.read_error(e))?;
            self.deliver(&decoded).await?;
            decoded.clear();
        }
        Ok(())
    }
}

/// Streams a body from `conn` into `sink`, updating `stat.len` and
/// `stat.rd_size` as bytes arrive so a failed attempt can be resumed.
///
/// Every chunk is flushed to the sink before the next read.
///
/// # Errors
///
/// [`FetchError::Read`] and [`FetchError::ShortRead`] for transport
/// trouble, [`FetchError::MalformedChunk`] for bad framing and
/// [`FetchError::FileWrite`] when the sink fails.
pub async fn read_body(
    conn: &mut Connection,
    sink: &mut BodySink,
    framing: Framing,
    ctx: &BodyContext<'_>,
    stat: &mut HttpStat,
) -> Result<(), FetchError> {
    ctx.progress.start(ctx.url, stat.restval, stat.total_len());
    let mut streamer = Streamer {
        sink,
        stat,
        ctx,
        timer: Timer::new(),
        throttle: ctx.limit_rate.map(Throttle::new),
    };

    let result = match framing {
        Framing::Empty => Ok(()),
        Framing::Length(length) => streamer.by_length(conn, length).await,
        Framing::Chunked => streamer.chunked(conn).await,
        Framing::UntilClose => streamer.until_close(conn).await,
    };

    let elapsed = streamer.timer.measure();
    streamer.stat.elapsed = elapsed;
    ctx.progress.finish(streamer.stat.rd_size, elapsed);
    debug!(
        received = streamer.stat.rd_size,
        elapsed_ms = elapsed.as_millis(),
        ok = result.is_ok(),
        "body finished"
    );
    result
}

/// Reads and discards a short body so the connection stays usable.
///
/// Returns `false` when the body is too long or of unknown length, or when
/// reading it fails; the connection must then be closed.
pub async fn skip_short_body(conn: &mut Connection, framing: Framing) -> bool {
    let limit = match framing {
        Framing::Empty => return true,
        Framing::UntilClose => return false,
        Framing::Length(length) if length > SKIP_THRESHOLD => return false,
        Framing::Length(length) => length,
        Framing::Chunked => SKIP_THRESHOLD,
    };

    let mut buf = vec![0u8; 1024];
    match framing {
        Framing::Length(_) => {
            let mut remaining = limit;
            while remaining > 0 {
                let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
                match conn.read(&mut buf[..want]).await {
                    Ok(0) | Err(_) => return false,
                    Ok(n) => remaining -= n as u64,
                }
            }
            trace!(skipped = limit, "skipped short body");
            true
        }
        _ => {
            let mut decoder = ChunkedDecoder::new();
            let mut decoded = Vec::new();
            let mut seen = 0u64;
            while !decoder.is_done() {
                let n = match conn.peek(&mut buf).await {
                    Ok(0) | Err(_) => return false,
                    Ok(n) => n,
                };
                let Ok(used) = decoder.feed(&buf[..n], &mut decoded) else {
                    return false;
                };
                if conn.consume(used, None).await.is_err() {
                    return false;
                }
                seen += used as u64;
                decoded.clear();
                if seen > limit && !decoder.is_done() {
                    return false;
                }
            }
            true
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::connect::PlainTransport;

    #[derive(Default)]
    struct Counting {
        advanced: AtomicU64,
        finished: AtomicU64,
    }

    impl ProgressObserver for Counting {
        fn start(&self, _url: &str, _restval: u64, _expected: Option<u64>) {}
        fn advance(&self, bytes: u64) {
            self.advanced.fetch_add(bytes, Ordering::SeqCst);
        }
        fn finish(&self, received: u64, _elapsed: Duration) {
            self.finished.store(received, Ordering::SeqCst);
        }
    }

    async fn serve(bytes: &'static [u8]) -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(bytes).await.unwrap();
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        Connection::new(
            Box::new(PlainTransport::new(stream)),
            addr,
            false,
            Some(Duration::from_secs(5)),
        )
    }

    async fn stream_to_file(
        bytes: &'static [u8],
        framing: Framing,
    ) -> (Result<(), FetchError>, Vec<u8>, HttpStat, u64) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut sink = BodySink::open(&path, false).await.unwrap();
        let mut conn = serve(bytes).await;
        let counting = Arc::new(Counting::default());
        let progress: Arc<dyn ProgressObserver> = counting.clone();
        let ctx = BodyContext {
            url: "http://test/",
            limit_rate: None,
            progress: &progress,
        };
        let mut stat = HttpStat::default();
        let result = read_body(&mut conn, &mut sink, framing, &ctx, &mut stat).await;
        drop(sink);
        let written = std::fs::read(&path).unwrap();
        let advanced = counting.advanced.load(Ordering::SeqCst);
        assert_eq!(counting.finished.load(Ordering::SeqCst), stat.rd_size);
        (result, written, stat, advanced)
    }

    #[tokio::test]
    async fn test_length_framing() {
        let (result, written, stat, advanced) =
            stream_to_file(b"0123456789trailing", Framing::Length(10)).await;
        result.unwrap();
        assert_eq!(written, b"0123456789");
        assert_eq!(stat.len, 10);
        assert_eq!(advanced, 10);
    }

    #[tokio::test]
    async fn test_length_short_read() {
        let (result, written, stat, _) = stream_to_file(b"01234", Framing::Length(10)).await;
        match result.unwrap_err() {
            FetchError::ShortRead {
                received, expected, ..
            } => {
                assert_eq!(received, 5);
                assert_eq!(expected, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(written, b"01234");
        assert_eq!(stat.rd_size, 5);
    }

    #[tokio::test]
    async fn test_chunked_framing() {
        let (result, written, stat, _) =
            stream_to_file(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n", Framing::Chunked).await;
        result.unwrap();
        assert_eq!(written, b"Wikipedia");
        assert_eq!(stat.len, 9);
    }

    #[tokio::test]
    async fn test_bad_chunk_size() {
        let (result, _, _, _) = stream_to_file(b"xyz\r\nWiki\r\n", Framing::Chunked).await;
        assert!(matches!(result, Err(FetchError::MalformedChunk { .. })));
    }

    #[tokio::test]
    async fn test_until_close() {
        let (result, written, _, _) = stream_to_file(b"all of it", Framing::UntilClose).await;
        result.unwrap();
        assert_eq!(written, b"all of it");
    }

    #[tokio::test]
    async fn test_skip_short_body() {
        let mut conn = serve(b"abcdeHTTP").await;
        assert!(skip_short_body(&mut conn, Framing::Length(5)).await);
        let mut rest = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += conn.read(&mut rest[got..]).await.unwrap();
        }
        assert_eq!(&rest, b"HTTP");

        let mut conn = serve(b"").await;
        assert!(!skip_short_body(&mut conn, Framing::Length(SKIP_THRESHOLD + 1)).await);
        assert!(!skip_short_body(&mut conn, Framing::UntilClose).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_sleeps_to_rate() {
        let mut timer = Timer::new();
        let mut throttle = Throttle::new(1000);
        let start = tokio::time::Instant::now();
        throttle.limit(2000, &mut timer).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1900), "waited {waited:?}");
    }
}
