//! Chunked transfer-encoding decoder.
//!
//! Grounded in the chunk-phase/data-phase state machine used by chunked body
//! decoders elsewhere in the ecosystem (a single integer tracks "reading a
//! size line" vs. "N data bytes remaining"), adapted here to decode
//! in-place into the connection's pooled scratch buffer rather than
//! borrowing a `bytes::Buf`, so the decoded body stays a zero-copy slice
//! like every other [`Request`](crate::Request) field.

use crate::errors::ErrorKind;
use memchr::memchr;

/// Default cap on any single chunk's declared size.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading a `size[;ext]CRLF` line.
    Size,
    /// `remaining` more data bytes owed before the mandatory trailing CRLF.
    Data { remaining: usize },
    /// Chunk complete, trailing CRLF not yet consumed.
    ChunkCrlf,
    /// Last (zero-size) chunk seen; consuming the trailer section up to the
    /// empty line that ends it.
    Trailer,
    Done,
}

/// Incremental chunked-body decoder.
///
/// Feed it bytes via [`ChunkedDecoder::decode`]; it copies data bytes
/// (chunk framing and extensions excluded) to the end of an output buffer
/// and reports how many input bytes it consumed. A sticky error, once
/// returned, is returned again by any further call.
pub(crate) struct ChunkedDecoder {
    phase: Phase,
    max_chunk_size: usize,
    max_body_size: usize,
    delivered: usize,
    sticky_error: Option<ErrorKind>,
}

impl ChunkedDecoder {
    pub(crate) fn new(max_chunk_size: usize, max_body_size: usize) -> Self {
        Self {
            phase: Phase::Size,
            max_chunk_size,
            max_body_size,
            delivered: 0,
            sticky_error: None,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Consumes as much of `input` as forms complete chunk framing/data,
    /// appending decoded data bytes to `out`. Returns the number of bytes of
    /// `input` consumed. Call again with more input (resuming where this
    /// left off) until [`ChunkedDecoder::is_done`].
    pub(crate) fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, ErrorKind> {
        if let Some(ref e) = self.sticky_error {
            return Err(clone_kind(e));
        }
        match self.decode_inner(input, out) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.sticky_error = Some(clone_kind(&e));
                self.phase = Phase::Done;
                Err(e)
            }
        }
    }

    fn decode_inner(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, ErrorKind> {
        let mut pos = 0;

        loop {
            match self.phase {
                Phase::Done => return Ok(pos),
                Phase::Size => {
                    let rest = &input[pos..];
                    let Some(nl) = memchr(b'\n', rest) else {
                        return Ok(pos);
                    };
                    let mut line = &rest[..nl];
                    if line.last() == Some(&b'\r') {
                        line = &line[..line.len() - 1];
                    }
                    // chunk-extensions are ignored entirely to mitigate
                    // request smuggling via divergent extension parsing.
                    let size_field = match memchr(b';', line) {
                        Some(i) => &line[..i],
                        None => line,
                    };
                    let size_str =
                        std::str::from_utf8(size_field).map_err(|_| ErrorKind::MalformedChunk)?;
                    let size = usize::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| ErrorKind::MalformedChunk)?;
                    if size > self.max_chunk_size {
                        return Err(ErrorKind::MalformedChunk);
                    }

                    pos += nl + 1;
                    self.phase = if size == 0 {
                        Phase::Trailer
                    } else {
                        Phase::Data { remaining: size }
                    };
                }
                Phase::Data { remaining } => {
                    let available = input.len() - pos;
                    if available == 0 {
                        return Ok(pos);
                    }
                    let take = available.min(remaining);
                    if self.max_body_size != 0 && self.delivered + take > self.max_body_size {
                        return Err(ErrorKind::PayloadTooLarge);
                    }
                    out.extend_from_slice(&input[pos..pos + take]);
                    self.delivered += take;
                    pos += take;

                    let left = remaining - take;
                    self.phase = if left == 0 {
                        Phase::ChunkCrlf
                    } else {
                        Phase::Data { remaining: left }
                    };
                }
                Phase::ChunkCrlf => {
                    let rest = &input[pos..];
                    if rest.len() < 2 {
                        return Ok(pos);
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ErrorKind::MalformedChunk);
                    }
                    pos += 2;
                    self.phase = Phase::Size;
                }
                Phase::Trailer => {
                    let rest = &input[pos..];
                    let Some(nl) = memchr(b'\n', rest) else {
                        return Ok(pos);
                    };
                    let line = &rest[..nl];
                    pos += nl + 1;
                    if line.is_empty() || line == b"\r" {
                        self.phase = Phase::Done;
                    }
                    // non-empty trailer lines are discarded per-line; loop
                    // continues scanning for the terminating empty line.
                }
            }
        }
    }
}

fn clone_kind(e: &ErrorKind) -> ErrorKind {
    match e {
        ErrorKind::MalformedChunk => ErrorKind::MalformedChunk,
        ErrorKind::PayloadTooLarge => ErrorKind::PayloadTooLarge,
        other => {
            debug_assert!(false, "unexpected sticky chunked error kind: {other:?}");
            ErrorKind::MalformedChunk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8], max_chunk: usize, max_body: usize) -> Result<Vec<u8>, ErrorKind> {
        let mut decoder = ChunkedDecoder::new(max_chunk, max_body);
        let mut out = Vec::new();
        let consumed = decoder.decode(input, &mut out)?;
        assert_eq!(consumed, input.len(), "fixture must be consumed in one shot");
        assert!(decoder.is_done());
        Ok(out)
    }

    #[test]
    fn decodes_wikipedia_example() {
        let body = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let out = decode_all(body, DEFAULT_MAX_CHUNK_SIZE, 0).unwrap();
        assert_eq!(out, b"Wikipedia");
    }

    #[test]
    fn strips_chunk_extensions() {
        let body = b"4;ignored=ext\r\nWiki\r\n0\r\n\r\n";
        let out = decode_all(body, DEFAULT_MAX_CHUNK_SIZE, 0).unwrap();
        assert_eq!(out, b"Wiki");
    }

    #[test]
    fn discards_trailers() {
        let body = b"0\r\nX-Trailer: ignored\r\n\r\n";
        let out = decode_all(body, DEFAULT_MAX_CHUNK_SIZE, 0).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_non_hex_size() {
        let mut decoder = ChunkedDecoder::new(DEFAULT_MAX_CHUNK_SIZE, 0);
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"zz\r\n", &mut out),
            Err(ErrorKind::MalformedChunk)
        );
    }

    #[test]
    fn rejects_chunk_over_cap() {
        let mut decoder = ChunkedDecoder::new(4, 0);
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"10\r\n", &mut out),
            Err(ErrorKind::MalformedChunk)
        );
    }

    #[test]
    fn rejects_bad_chunk_trailing_crlf() {
        let mut decoder = ChunkedDecoder::new(DEFAULT_MAX_CHUNK_SIZE, 0);
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"4\r\nWikiXX0\r\n\r\n", &mut out),
            Err(ErrorKind::MalformedChunk)
        );
    }

    #[test]
    fn error_is_sticky() {
        let mut decoder = ChunkedDecoder::new(DEFAULT_MAX_CHUNK_SIZE, 0);
        let mut out = Vec::new();
        assert!(decoder.decode(b"zz\r\n", &mut out).is_err());
        assert_eq!(
            decoder.decode(b"4\r\nWiki\r\n0\r\n\r\n", &mut out),
            Err(ErrorKind::MalformedChunk)
        );
    }

    #[test]
    fn enforces_total_body_cap() {
        let mut decoder = ChunkedDecoder::new(DEFAULT_MAX_CHUNK_SIZE, 4);
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"5\r\nhello\r\n0\r\n\r\n", &mut out),
            Err(ErrorKind::PayloadTooLarge)
        );
    }

    #[test]
    fn feeds_incrementally_across_calls() {
        let mut decoder = ChunkedDecoder::new(DEFAULT_MAX_CHUNK_SIZE, 0);
        let mut out = Vec::new();

        let consumed = decoder.decode(b"4\r\nWi", &mut out).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(out, b"Wi");

        let consumed = decoder.decode(b"ki\r\n0\r\n\r\n", &mut out).unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(out, b"Wiki");
        assert!(decoder.is_done());
    }
}
