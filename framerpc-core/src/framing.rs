//! Header-delimited message framing
//!
//! Each message on the wire is a header block terminated by `\r\n\r\n`,
//! followed by exactly `Content-Length` bytes of JSON:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"add","params":[1,2]}
//! ```
//!
//! [`FrameReader`] yields one message per call, copied into a buffer rented
//! from a [`BufferPool`]. [`FrameWriter`] does the reverse.

use crate::error::{Error, Result};
use crate::pool::{BufferPool, PooledBuffer};
use std::io::Write as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const TERMINATOR: &[u8; 4] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"content-length";
const INITIAL_CAPACITY: usize = 8 * 1024;
/// An empty working buffer larger than this is shrunk back to `INITIAL_CAPACITY`
const SHRINK_THRESHOLD: usize = 64 * 1024;

/// Header blocks larger than this are treated as a broken stream
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Outcome of one [`FrameReader::next_message`] call
#[derive(Debug)]
pub enum Frame {
    /// One complete message body
    Message(PooledBuffer),
    /// The header block had no usable `Content-Length`; the header was skipped
    Malformed(String),
    /// The source is exhausted
    End,
    /// Cancellation was observed before a complete message was read
    Cancelled,
}

enum Fill {
    Data,
    Eof,
    Cancelled,
}

/// Reads header-delimited frames from an async byte source
///
/// Framing is strictly sequential: a message is completely read before the
/// next header is scanned. The working buffer grows as needed and is
/// compacted in place, so a slow trickle of bytes never recurses or rescans
/// bytes it has already looked at.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    scanned: usize,
    pool: BufferPool,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, pool: BufferPool, max_message_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0; INITIAL_CAPACITY],
            start: 0,
            end: 0,
            scanned: 0,
            pool,
            max_message_size,
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Read the next message
    ///
    /// Returns `Err` only for unrecoverable conditions: a transport error, a
    /// declared length above the configured maximum, or an oversized header
    /// block. A missing or non-numeric `Content-Length` yields
    /// [`Frame::Malformed`] and the reader stays usable.
    pub async fn next_message(&mut self, cancel: &CancellationToken) -> Result<Frame> {
        let header_len = loop {
            if let Some(pos) = self.find_terminator() {
                break pos - self.start;
            }
            if self.end - self.start > MAX_HEADER_SIZE {
                return Err(Error::FrameTooLarge {
                    limit: MAX_HEADER_SIZE,
                    actual: self.end - self.start,
                });
            }
            match self.fill(cancel, 0).await? {
                Fill::Data => continue,
                Fill::Eof => {
                    if self.end > self.start {
                        tracing::warn!(
                            pending = self.end - self.start,
                            "stream ended inside a header block"
                        );
                    }
                    return Ok(Frame::End);
                }
                Fill::Cancelled => return Ok(Frame::Cancelled),
            }
        };

        let header = &self.buf[self.start..self.start + header_len];
        let Some(length) = parse_content_length(header) else {
            let text = String::from_utf8_lossy(header).into_owned();
            tracing::debug!(header = %text, "malformed frame header");
            self.consume(header_len + TERMINATOR.len());
            return Ok(Frame::Malformed(text));
        };
        if length > self.max_message_size {
            return Err(Error::FrameTooLarge {
                limit: self.max_message_size,
                actual: length,
            });
        }

        let frame_len = header_len + TERMINATOR.len() + length;
        while self.end - self.start < frame_len {
            match self.fill(cancel, frame_len).await? {
                Fill::Data => continue,
                Fill::Eof => {
                    tracing::warn!(
                        expected = length,
                        received = self.end - self.start - header_len - TERMINATOR.len(),
                        "stream ended inside a message body"
                    );
                    return Ok(Frame::End);
                }
                Fill::Cancelled => return Ok(Frame::Cancelled),
            }
        }

        let body_start = self.start + header_len + TERMINATOR.len();
        let message = self.pool.rent_copy(&self.buf[body_start..body_start + length]);
        self.consume(frame_len);
        Ok(Frame::Message(message))
    }

    /// Resume the terminator search where the last one stopped
    ///
    /// On success `scanned` is left on the terminator so a repeated call
    /// (after a cancelled body read) finds it again immediately.
    fn find_terminator(&mut self) -> Option<usize> {
        let mut i = self.scanned.max(self.start);
        while i < self.end {
            let Some(offset) = self.buf[i..self.end].iter().position(|&b| b == b'\r') else {
                break;
            };
            let pos = i + offset;
            if pos + TERMINATOR.len() > self.end {
                self.scanned = pos;
                return None;
            }
            if &self.buf[pos..pos + TERMINATOR.len()] == TERMINATOR {
                self.scanned = pos;
                return Some(pos);
            }
            i = pos + 1;
        }
        self.scanned = self.end;
        None
    }

    fn consume(&mut self, len: usize) {
        self.start += len;
        self.scanned = self.start;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
            self.scanned = 0;
            if self.buf.len() > SHRINK_THRESHOLD {
                self.buf.truncate(INITIAL_CAPACITY);
                self.buf.shrink_to(INITIAL_CAPACITY);
            }
        }
    }

    /// Read more bytes, making room for `want` bytes from `start`
    async fn fill(&mut self, cancel: &CancellationToken, want: usize) -> Result<Fill> {
        let want = want.max(self.end - self.start + 1);
        if self.start + want > self.buf.len() && self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.scanned -= self.start;
            self.start = 0;
        }
        if want > self.buf.len() || self.end == self.buf.len() {
            let grown = want.max(self.buf.len() * 2);
            self.buf.resize(grown, 0);
        }

        let end = self.end;
        let reader = &mut self.reader;
        let buf = &mut self.buf[end..];
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Fill::Cancelled),
            read = reader.read(buf) => read?,
        };
        if read == 0 {
            return Ok(Fill::Eof);
        }
        self.end += read;
        Ok(Fill::Data)
    }
}

/// Find the `Content-Length` field in a header block
///
/// The field name is matched case-insensitively and other fields are
/// ignored. Digits are read up to the first non-digit; a value with no
/// leading digits, or one that overflows, is `None`.
pub fn parse_content_length(header: &[u8]) -> Option<usize> {
    for line in header.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = line[..colon].trim_ascii();
        if !name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        let value = line[colon + 1..].trim_ascii_start();
        let digits = value.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        return value[..digits].iter().try_fold(0usize, |acc, &d| {
            acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
        });
    }
    None
}

/// Encode one frame into a fresh buffer
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 32);
    // writing into a Vec cannot fail
    let _ = write!(frame, "Content-Length: {}\r\n\r\n", payload.len());
    frame.extend_from_slice(payload);
    frame
}

/// Writes header-delimited frames to an async byte sink
pub struct FrameWriter<W> {
    writer: W,
    header: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header: Vec::with_capacity(32),
        }
    }

    /// Write one frame and flush it
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.header.clear();
        write!(self.header, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&self.header).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reader(input: &[u8]) -> FrameReader<&[u8]> {
        FrameReader::new(input, BufferPool::new(4), 1024)
    }

    async fn next_body(reader: &mut FrameReader<impl AsyncRead + Unpin>) -> Vec<u8> {
        match reader.next_message(&CancellationToken::new()).await.unwrap() {
            Frame::Message(body) => body.to_vec(),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length(b"Content-Length: 42"), Some(42));
        assert_eq!(parse_content_length(b"content-length:7"), Some(7));
        assert_eq!(
            parse_content_length(b"Content-Type: application/json\r\nCONTENT-LENGTH: 12"),
            Some(12)
        );
        assert_eq!(parse_content_length(b"Content-Length: 15abc"), Some(15));
        assert_eq!(parse_content_length(b"Content-Length: abc"), None);
        assert_eq!(parse_content_length(b"Content-Length: "), None);
        assert_eq!(parse_content_length(b"Content-Type: text"), None);
        assert_eq!(
            parse_content_length(b"Content-Length: 999999999999999999999999999"),
            None
        );
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut input = encode_frame(br#"{"a":1}"#);
        input.extend(encode_frame(br#"{"b":2}"#));
        let mut reader = reader(&input);

        assert_eq!(next_body(&mut reader).await, br#"{"a":1}"#);
        assert_eq!(next_body(&mut reader).await, br#"{"b":2}"#);
        assert!(matches!(
            reader.next_message(&CancellationToken::new()).await.unwrap(),
            Frame::End
        ));
    }

    #[tokio::test]
    async fn test_slow_trickle() {
        let frame = encode_frame(br#"{"jsonrpc":"2.0","method":"ping"}"#);
        let mut builder = tokio_test::io::Builder::new();
        for byte in frame.chunks(1) {
            builder.read(byte);
        }
        let mut reader = FrameReader::new(builder.build(), BufferPool::new(1), 1024);

        assert_eq!(
            next_body(&mut reader).await,
            br#"{"jsonrpc":"2.0","method":"ping"}"#
        );
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let mut reader = FrameReader::new(
            tokio_test::io::Builder::new()
                .read(b"Content-Length: 2\r")
                .read(b"\n\r")
                .read(b"\n{")
                .read(b"}")
                .build(),
            BufferPool::new(1),
            1024,
        );
        assert_eq!(next_body(&mut reader).await, b"{}");
    }

    #[tokio::test]
    async fn test_malformed_length_is_reported_and_skipped() {
        let mut input = b"Content-Length: abc\r\n\r\n".to_vec();
        input.extend(encode_frame(b"{}"));
        let mut reader = reader(&input);

        let cancel = CancellationToken::new();
        match reader.next_message(&cancel).await.unwrap() {
            Frame::Malformed(header) => assert!(header.contains("abc")),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        assert_eq!(next_body(&mut reader).await, b"{}");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let input = b"Content-Length: 4096\r\n\r\n".to_vec();
        let mut reader = reader(&input);
        let err = reader
            .next_message(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                limit: 1024,
                actual: 4096
            }
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_body_ends_stream() {
        let input = b"Content-Length: 10\r\n\r\n{\"a\"".to_vec();
        let mut reader = reader(&input);
        assert!(matches!(
            reader.next_message(&CancellationToken::new()).await.unwrap(),
            Frame::End
        ));
    }

    #[tokio::test]
    async fn test_cancellation_before_header() {
        let (client, _server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client, BufferPool::new(1), 1024);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        assert!(matches!(
            reader.next_message(&cancel).await.unwrap(),
            Frame::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_large_message_grows_buffer() {
        let body = format!("[{}]", vec!["1"; 6000].join(","));
        let input = encode_frame(body.as_bytes());
        let mut reader = FrameReader::new(&input[..], BufferPool::new(1), 1 << 20);
        assert_eq!(next_body(&mut reader).await, body.as_bytes());
    }

    #[tokio::test]
    async fn test_buffer_shrinks_after_large_message() {
        let body = format!("[{}]", vec!["7"; 100_000].join(","));
        let input = encode_frame(body.as_bytes());
        let mut reader = FrameReader::new(&input[..], BufferPool::new(1), 1 << 20);

        assert_eq!(next_body(&mut reader).await, body.as_bytes());
        assert!(reader.buf.capacity() <= SHRINK_THRESHOLD);
        assert!(matches!(
            reader.next_message(&CancellationToken::new()).await.unwrap(),
            Frame::End
        ));
    }

    #[tokio::test]
    async fn test_messages_return_to_pool() {
        let input = encode_frame(b"[]");
        let pool = BufferPool::new(2);
        let mut reader = FrameReader::new(&input[..], pool.clone(), 1024);

        let frame = reader.next_message(&CancellationToken::new()).await.unwrap();
        assert_eq!(pool.outstanding(), 1);
        drop(frame);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_writer_output() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(b"{}").await.unwrap();
        writer.write_frame(b"[1]").await.unwrap();
        assert_eq!(
            writer.into_inner(),
            b"Content-Length: 2\r\n\r\n{}Content-Length: 3\r\n\r\n[1]"
        );
    }
}
