//! Chunked transfer-encoding (`Transfer-Encoding: chunked`) reader and writer.
//!
//! The fixed-size request [`Parser`](crate::http::request::Parser) buffer cannot hold a
//! chunked body: chunked bodies are open-ended by design, so the decoder reads directly
//! from the live [`TcpStream`] instead, past whatever the parser already buffered.

use memchr::memchr;
use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::sleep,
};

/// Decodes a `Transfer-Encoding: chunked` request body directly from a [`TcpStream`].
///
/// Framing errors are unrecoverable: per the wire protocol, a chunk size line or
/// trailing CRLF that fails to parse means the connection no longer agrees with the
/// peer about byte boundaries, so the caller must close the connection without
/// attempting to send a response.
pub(crate) struct ChunkedReader<'a, S> {
    stream: &'a mut S,
    timeout: Duration,
    /// Bytes already read past the header block by the request parser, consumed first.
    carry: Vec<u8>,
    carry_pos: usize,
    state: DecoderState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    /// Waiting for a `<hex-size>[;ext...]\r\n` line.
    ChunkHeader,
    /// `remaining` bytes of chunk data left to deliver.
    ChunkData { remaining: usize },
    /// The CRLF that terminates a chunk's data has not yet been consumed.
    ChunkTrailerCrlf,
    /// The terminal `0\r\n` chunk was seen; draining trailer headers until `\r\n\r\n`.
    Trailers,
    Done,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ChunkedFramingError;

impl<'a, S: AsyncRead + Unpin> ChunkedReader<'a, S> {
    pub(crate) fn new(stream: &'a mut S, timeout: Duration, carry: Vec<u8>) -> Self {
        Self {
            stream,
            timeout,
            carry,
            carry_pos: 0,
            state: DecoderState::ChunkHeader,
        }
    }

    /// Reads the next slice of decoded body bytes. Returns `Ok(None)` once the
    /// terminal chunk and any trailers have been fully consumed.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChunkedFramingError> {
        loop {
            match self.state {
                DecoderState::Done => return Ok(None),
                DecoderState::ChunkHeader => {
                    let line = self.read_line().await?;
                    let size = parse_chunk_size(&line)?;

                    self.state = if size == 0 {
                        DecoderState::Trailers
                    } else {
                        DecoderState::ChunkData { remaining: size }
                    };
                }
                DecoderState::ChunkData { remaining } => {
                    let data = self.read_exact(remaining).await?;
                    self.state = DecoderState::ChunkTrailerCrlf;
                    return Ok(Some(data));
                }
                DecoderState::ChunkTrailerCrlf => {
                    let crlf = self.read_exact(2).await?;
                    if crlf != b"\r\n" {
                        return Err(ChunkedFramingError);
                    }
                    self.state = DecoderState::ChunkHeader;
                }
                DecoderState::Trailers => {
                    let line = self.read_line().await?;
                    if line.is_empty() {
                        self.state = DecoderState::Done;
                        return Ok(None);
                    }
                    // Trailer headers are discarded: the spec's request view has no
                    // hook to append headers after the body has started streaming.
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, ChunkedFramingError> {
        let mut line = Vec::new();
        loop {
            if let Some(pos) = memchr(b'\n', &self.carry[self.carry_pos..]) {
                let end = self.carry_pos + pos;
                line.extend_from_slice(&self.carry[self.carry_pos..end]);
                self.carry_pos = end + 1;
                if line.pop() != Some(b'\r') {
                    return Err(ChunkedFramingError);
                }
                return Ok(line);
            }

            line.extend_from_slice(&self.carry[self.carry_pos..]);
            self.carry.clear();
            self.carry_pos = 0;
            self.refill().await?;
        }
    }

    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ChunkedFramingError> {
        let mut out = Vec::with_capacity(n);

        while out.len() < n {
            let available = &self.carry[self.carry_pos..];
            if available.is_empty() {
                self.refill().await?;
                continue;
            }

            let need = n - out.len();
            let take = need.min(available.len());
            out.extend_from_slice(&available[..take]);
            self.carry_pos += take;
        }

        Ok(out)
    }

    async fn refill(&mut self) -> Result<(), ChunkedFramingError> {
        let mut buf = [0u8; 4096];

        let n = tokio::select! {
            biased;

            result = self.stream.read(&mut buf) => result.map_err(|_| ChunkedFramingError)?,
            _ = sleep(self.timeout) => return Err(ChunkedFramingError),
        };

        if n == 0 {
            return Err(ChunkedFramingError);
        }

        self.carry.clear();
        self.carry_pos = 0;
        self.carry.extend_from_slice(&buf[..n]);
        Ok(())
    }
}

/// Error from [`read_full_body`]: either the wire framing broke (connection must
/// close without a response) or the decoded body exceeded the configured limit
/// (connection gets the canned `413` response, same as an oversized `Content-Length`).
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChunkedBodyError {
    Framing,
    TooLarge,
}

impl From<ChunkedFramingError> for ChunkedBodyError {
    fn from(_: ChunkedFramingError) -> Self {
        ChunkedBodyError::Framing
    }
}

/// Decodes an entire chunked request body into one buffer, bounded by `max_size`.
///
/// `carry` is whatever the request parser already buffered past the header block.
pub(crate) async fn read_full_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    carry: Vec<u8>,
    timeout: Duration,
    max_size: usize,
) -> Result<Vec<u8>, ChunkedBodyError> {
    let mut reader = ChunkedReader::new(stream, timeout, carry);
    let mut body = Vec::new();

    while let Some(chunk) = reader.next_chunk().await? {
        if body.len() + chunk.len() > max_size {
            return Err(ChunkedBodyError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ChunkedFramingError> {
    // Chunk extensions (`<size>;name=value`) are accepted and discarded.
    let digits = match memchr(b';', line) {
        Some(pos) => &line[..pos],
        None => line,
    };

    if digits.is_empty() {
        return Err(ChunkedFramingError);
    }

    let mut size: usize = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as usize,
            b'a'..=b'f' => (b - b'a' + 10) as usize,
            b'A'..=b'F' => (b - b'A' + 10) as usize,
            _ => return Err(ChunkedFramingError),
        };
        size = size.checked_mul(16).ok_or(ChunkedFramingError)?;
        size = size.checked_add(digit).ok_or(ChunkedFramingError)?;
    }

    Ok(size)
}

/// Writes a response body as `Transfer-Encoding: chunked` directly to a [`TcpStream`].
///
/// Every non-empty write is framed as `hex(len) CRLF buf CRLF`. [`ChunkedWriter::finish`]
/// must be called on every exit path (success or error) to emit the terminal
/// `0\r\n\r\n`; forgetting it leaves the peer waiting for a chunk that never arrives.
pub(crate) struct ChunkedWriter<'a, S> {
    stream: &'a mut S,
    timeout: Duration,
}

impl<'a, S: AsyncWrite + Unpin> ChunkedWriter<'a, S> {
    pub(crate) fn new(stream: &'a mut S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    pub(crate) async fn write(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut framed = format!("{:x}\r\n", buf.len()).into_bytes();
        framed.extend_from_slice(buf);
        framed.extend_from_slice(b"\r\n");

        self.write_all(&framed).await
    }

    pub(crate) async fn finish(self) -> Result<(), io::Error> {
        self.write_terminal().await
    }

    async fn write_terminal(mut self) -> Result<(), io::Error> {
        self.write_all(b"0\r\n\r\n").await
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = self.stream.write_all(buf) => result,
            _ = sleep(self.timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout")),
        }
    }
}

#[cfg(test)]
mod chunk_size {
    use super::*;

    #[test]
    fn parses_hex_sizes() {
        #[rustfmt::skip]
        let cases: &[(&[u8], Result<usize, ChunkedFramingError>)] = &[
            (b"0", Ok(0)),
            (b"5", Ok(5)),
            (b"a", Ok(10)),
            (b"FF", Ok(255)),
            (b"1A2b", Ok(0x1A2B)),
            (b"5;name=value", Ok(5)),
            (b"0;last-chunk", Ok(0)),
            (b"", Err(ChunkedFramingError)),
            (b"xyz", Err(ChunkedFramingError)),
            (b"-1", Err(ChunkedFramingError)),
        ];

        for (line, expected) in cases {
            assert_eq!(parse_chunk_size(line), *expected);
        }
    }
}
