//! Pushback-capable streaming reader with HTTP parsing primitives.
//!
//! [`MessageReader`] wraps any byte source with an internal pushback buffer
//! that supports arbitrary [`unread`](MessageReader::unread), and exposes the
//! primitives the header and body parsers are built from: token, line, CRLF,
//! linear whitespace, one header field, one chunk.
//!
//! Every primitive works over any [`AsyncRead`], so tests run against
//! in-memory slices instead of live sockets.

use crate::{
    errors::{Error, Result},
    http::{
        chars,
        headers::HeaderField,
    },
};
use memchr::memchr;
use std::{collections::VecDeque, io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::sleep,
};

/// Bytes pulled from the source per refill.
const FILL_CHUNK: usize = 8 * 1024;

/// A buffered reader over an HTTP message stream.
///
/// # Reading model
///
/// All primitives consume from the pushback buffer first and refill from the
/// source only when it runs dry. A primitive that fails to match (for
/// example [`read_crlf`](Self::read_crlf) on `"\r\r"`) pushes every byte it
/// consumed back, so the stream position is unchanged on mismatch.
///
/// # Timeouts
///
/// With a read timeout configured, every refill from the source races the
/// timeout; expiry surfaces as an [`io::ErrorKind::TimedOut`] transport
/// error. There is no cooperative cancellation beyond this.
///
/// # Examples
///
/// ```
/// use wiregate::MessageReader;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wiregate::Result<()> {
/// let mut reader = MessageReader::new(&b"GET /x HTTP/1.1\r\n"[..]);
///
/// let line = reader.read_line().await?;
/// assert_eq!(line.as_deref(), Some("GET /x HTTP/1.1"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MessageReader<R> {
    src: R,
    buf: VecDeque<u8>,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wraps a byte source with no read timeout.
    #[inline]
    pub fn new(src: R) -> Self {
        Self {
            src,
            buf: VecDeque::with_capacity(FILL_CHUNK),
            timeout: None,
        }
    }

    /// Wraps a byte source; every refill races `timeout`.
    #[inline]
    pub fn with_timeout(src: R, timeout: Duration) -> Self {
        Self {
            src,
            buf: VecDeque::with_capacity(FILL_CHUNK),
            timeout: Some(timeout),
        }
    }

    /// Pushes bytes back so the next read sees them first, in order.
    pub fn unread(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.buf.push_front(byte);
        }
    }

    /// Pushes one byte back.
    #[inline(always)]
    pub fn unread_byte(&mut self, byte: u8) {
        self.buf.push_front(byte);
    }

    /// Refills the pushback buffer from the source. Returns the number of
    /// bytes read; 0 means end-of-stream.
    async fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; FILL_CHUNK];

        let n = match self.timeout {
            Some(time) => {
                tokio::select! {
                    biased;

                    read_result = self.src.read(&mut chunk) => read_result?,
                    _ = sleep(time) => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"));
                    }
                }
            }
            None => self.src.read(&mut chunk).await?,
        };

        self.buf.extend(&chunk[..n]);
        Ok(n)
    }

    /// Returns the next byte, refilling as needed. `None` at end-of-stream.
    async fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }

        Ok(self.buf.pop_front())
    }

    /// Consumes `expected` exactly, or consumes nothing.
    ///
    /// On a mismatch or end-of-stream, every byte taken so far (and the
    /// mismatching byte) is pushed back and `false` is returned.
    pub async fn match_bytes(&mut self, expected: &[u8]) -> Result<bool> {
        let mut taken = 0;

        for (i, &want) in expected.iter().enumerate() {
            match self.next_byte().await? {
                Some(byte) if byte == want => taken = i + 1,
                Some(byte) => {
                    self.unread_byte(byte);
                    self.unread(&expected[..taken]);
                    return Ok(false);
                }
                None => {
                    self.unread(&expected[..taken]);
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Reads one HTTP token: characters that are neither control nor
    /// separator characters.
    ///
    /// Returns `None` on immediate end-of-stream. The first disqualifying
    /// byte is pushed back.
    pub async fn read_token(&mut self) -> Result<Option<String>> {
        let mut token = Vec::new();

        loop {
            match self.next_byte().await? {
                Some(byte) if chars::is_token_char(byte) => token.push(byte),
                Some(byte) => {
                    self.unread_byte(byte);
                    break;
                }
                None if token.is_empty() => return Ok(None),
                None => break,
            }
        }

        // Token characters are a subset of printable ASCII.
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }

    /// Reads one line terminated by a bare CRLF.
    ///
    /// A lone CR followed by anything but LF is data; the follower is pushed
    /// back. Returns the line without its terminator, or `None` if the
    /// stream ended before any byte was read.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line: Vec<u8> = Vec::new();
        let mut saw_any = false;

        loop {
            if self.buf.is_empty() && self.fill().await? == 0 {
                if !saw_any {
                    return Ok(None);
                }
                break;
            }
            saw_any = true;

            let front = self.buf.as_slices().0;
            match memchr(b'\r', front) {
                None => {
                    let len = front.len();
                    line.extend(self.buf.drain(..len));
                }
                Some(i) => {
                    line.extend(self.buf.drain(..i));
                    self.buf.pop_front(); // the CR

                    match self.next_byte().await? {
                        Some(b'\n') => break,
                        Some(other) => {
                            line.push(b'\r');
                            self.unread_byte(other);
                        }
                        // Trailing CR at end-of-stream is data.
                        None => {
                            line.push(b'\r');
                            break;
                        }
                    }
                }
            }
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Attempts to match exactly CRLF; consumes nothing on mismatch.
    #[inline]
    pub async fn read_crlf(&mut self) -> Result<bool> {
        self.match_bytes(b"\r\n").await
    }

    /// Attempts to match linear whitespace: optional CRLF followed by one or
    /// more SP/HT. Pushes everything back and returns `false` when no
    /// linear whitespace follows.
    pub async fn read_lws(&mut self) -> Result<bool> {
        let crlf = self.match_bytes(b"\r\n").await?;

        match self.next_byte().await? {
            Some(byte) if chars::is_lws(byte) => {
                // Fold the rest of the whitespace run.
                while let Some(next) = self.next_byte().await? {
                    if !chars::is_lws(next) {
                        self.unread_byte(next);
                        break;
                    }
                }
                Ok(true)
            }
            other => {
                if let Some(byte) = other {
                    self.unread_byte(byte);
                }
                if crlf {
                    self.unread(b"\r\n");
                }
                Ok(false)
            }
        }
    }

    /// Parses one header field: `token ":" LWS field-value CRLF`, with
    /// RFC 2616 folded continuation lines joined by a single SP.
    ///
    /// Fails with [`Error::HeaderMissingColon`] if no colon follows the
    /// field name.
    pub async fn read_header(&mut self) -> Result<HeaderField> {
        let name = self
            .read_token()
            .await?
            .ok_or(Error::UnexpectedEof)?;

        match self.next_byte().await? {
            Some(b':') => {}
            Some(byte) => {
                self.unread_byte(byte);
                return Err(Error::HeaderMissingColon(name));
            }
            None => return Err(Error::HeaderMissingColon(name)),
        }

        // Optional whitespace between the colon and the value.
        self.read_lws().await?;

        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.next_byte().await? {
                Some(b'\r') => {
                    self.unread_byte(b'\r');

                    if self.read_lws().await? {
                        // Folded continuation line.
                        value.push(b' ');
                    } else if self.read_crlf().await? {
                        break;
                    } else {
                        // Lone CR inside the value is data.
                        self.next_byte().await?;
                        value.push(b'\r');
                    }
                }
                Some(byte) => value.push(byte),
                None => break,
            }
        }

        Ok(HeaderField::new(
            name,
            String::from_utf8_lossy(&value).into_owned(),
        ))
    }

    /// Parses one chunk per RFC 2616, Section 3.6.1: a hex chunk-size line
    /// (`;`-delimited extensions ignored), exactly that many data bytes,
    /// then the trailing CRLF.
    ///
    /// The terminal chunk (size 0) yields an empty vec; any trailer headers
    /// after it are left unread.
    pub async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let line = self.read_line().await?.ok_or(Error::UnexpectedEof)?;
        let size = parse_chunk_size(&line)?;

        if size == 0 {
            return Ok(Vec::new());
        }

        let data = self.read_exact(size).await?;

        if !self.read_crlf().await? {
            return Err(Error::BadChunkTerminator);
        }

        Ok(data)
    }

    /// Reads exactly `n` bytes, failing with [`Error::UnexpectedEof`] if the
    /// stream ends first.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(FILL_CHUNK));

        while out.len() < n {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Err(Error::UnexpectedEof);
            }

            let take = (n - out.len()).min(self.buf.len());
            out.extend(self.buf.drain(..take));
        }

        Ok(out)
    }

    /// Copies exactly `n` bytes to `dest`. Used for length-delimited bodies.
    pub async fn copy_exact_to<W: AsyncWrite + Unpin>(
        &mut self,
        n: u64,
        dest: &mut W,
    ) -> Result<u64> {
        let mut remaining = n;

        while remaining > 0 {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Err(Error::UnexpectedEof);
            }

            let take = (remaining as usize).min(self.buf.len());
            let (chunk, _) = self.buf.as_slices();
            let take = take.min(chunk.len());

            dest.write_all(&chunk[..take]).await.map_err(Error::Io)?;
            self.buf.drain(..take);
            remaining -= take as u64;
        }

        Ok(n)
    }

    /// Copies bytes to `dest` until end-of-stream. Used for close-delimited
    /// bodies.
    pub async fn copy_to_eof<W: AsyncWrite + Unpin>(&mut self, dest: &mut W) -> Result<u64> {
        let mut copied = 0u64;

        loop {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Ok(copied);
            }

            let (chunk, _) = self.buf.as_slices();
            let take = chunk.len();

            dest.write_all(&chunk[..take]).await.map_err(Error::Io)?;
            self.buf.drain(..take);
            copied += take as u64;
        }
    }
}

/// Parses the hex size prefix of a chunk-size line. Extensions after `;`
/// (and trailing blanks) are ignored.
fn parse_chunk_size(line: &str) -> Result<usize> {
    let bytes = line.as_bytes();
    let mut size: usize = 0;
    let mut digits = 0;

    for &byte in bytes {
        match chars::hex_value(byte) {
            Some(value) => {
                size = size
                    .checked_mul(16)
                    .and_then(|s| s.checked_add(value as usize))
                    .ok_or_else(|| Error::BadChunkSize(line.to_owned()))?;
                digits += 1;
            }
            None => break,
        }
    }

    if digits == 0 {
        return Err(Error::BadChunkSize(line.to_owned()));
    }

    match bytes.get(digits) {
        None | Some(b';') | Some(b' ') | Some(b'\t') => Ok(size),
        Some(_) => Err(Error::BadChunkSize(line.to_owned())),
    }
}
