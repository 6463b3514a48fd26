//! Chunked transfer-coding decoder.
//!
//! Push-based: feed it whatever bytes are available and it reports how
//! many it consumed. It never consumes past the end of the body, so the
//! caller can peek at the stream, feed, and then read exactly the consumed
//! amount, leaving the next response untouched on a persistent connection.
//!
//! ```text
//! chunk-size [; ext] CRLF
//! chunk-data CRLF
//! ...
//! 0 CRLF
//! *(trailer-field CRLF)
//! CRLF
//! ```

use thiserror::Error;

/// Longest chunk-size line accepted.
const MAX_SIZE_LINE: usize = 1024;

/// Errors in chunk framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The size line is not a hex number.
    #[error("invalid chunk size '{line}'")]
    InvalidSize {
        /// The offending line, without its terminator.
        line: String,
    },
    /// The size line never ended.
    #[error("chunk size line too long")]
    SizeLineTooLong,
    /// Chunk data was not followed by a line terminator.
    #[error("missing line terminator after chunk data")]
    MissingTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Collecting a size line.
    Size,
    /// This many data bytes remain in the current chunk.
    Data(u64),
    /// Expecting CR or LF after chunk data.
    DataEnd,
    /// Got CR after chunk data, expecting LF.
    DataLf,
    /// Skipping trailer fields up to the empty line after the last chunk.
    Trailer,
    Done,
}

/// Incremental chunked-body decoder.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    line: Vec<u8>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Size,
            line: Vec::new(),
        }
    }

    /// Whether the terminating chunk and the trailer were seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decodes from `input`, appending body bytes to `out`.
    ///
    /// Returns how many input bytes were consumed. Stops early once the
    /// body is complete.
    ///
    /// # Errors
    ///
    /// Any [`ChunkError`]; the decoder must not be used afterwards.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, ChunkError> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                State::Size | State::Trailer => {
                    let rest = &input[pos..];
                    let (piece, complete) = match rest.iter().position(|&b| b == b'\n') {
                        Some(nl) => (&rest[..=nl], true),
                        None => (rest, false),
                    };
                    pos += piece.len();
                    if self.line.len() + piece.len() > MAX_SIZE_LINE {
                        return Err(ChunkError::SizeLineTooLong);
                    }
                    self.line.extend_from_slice(piece);
                    if complete {
                        self.end_line()?;
                    }
                }
                State::Data(remaining) => {
                    let available = input.len() - pos;
                    let take = usize::try_from(remaining).map_or(available, |r| r.min(available));
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        State::DataEnd
                    } else {
                        State::Data(left)
                    };
                }
                State::DataEnd => {
                    self.state = match input[pos] {
                        b'\r' => State::DataLf,
                        b'\n' => State::Size,
                        _ => return Err(ChunkError::MissingTerminator),
                    };
                    pos += 1;
                }
                State::DataLf => {
                    if input[pos] != b'\n' {
                        return Err(ChunkError::MissingTerminator);
                    }
                    self.state = State::Size;
                    pos += 1;
                }
                State::Done => break,
            }
        }
        Ok(pos)
    }

    fn end_line(&mut self) -> Result<(), ChunkError> {
        if self.state == State::Trailer {
            // Trailer fields are skipped; the empty line ends the body.
            if matches!(self.line.as_slice(), b"\n" | b"\r\n") {
                self.state = State::Done;
            }
            self.line.clear();
            return Ok(());
        }
        let size = parse_chunk_size(&self.line)?;
        self.line.clear();
        self.state = if size == 0 {
            State::Trailer
        } else {
            State::Data(size)
        };
        Ok(())
    }
}

/// Parses a chunk-size line: hex digits, optionally followed by `;ext`.
///
/// # Errors
///
/// [`ChunkError::InvalidSize`] for empty, signed, non-hex or overflowing
/// sizes.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkError> {
    let text = String::from_utf8_lossy(line);
    let invalid = || ChunkError::InvalidSize {
        line: text.trim_end().to_string(),
    };
    let digits = text.split(';').next().unwrap_or_default().trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}
