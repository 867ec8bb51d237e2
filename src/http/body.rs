//! Body transfer on top of a [`MessageReader`], driven by the head's
//! resolved [`TransferMode`].

use crate::{
    errors::Result,
    http::{message::TransferMode, reader::MessageReader},
};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Streams a message body out of the reader that parsed its head.
///
/// The strategy follows the transfer mode: copy exactly `n` bytes
/// ([`Length`](TransferMode::Length)), decode chunks until the zero-length
/// terminal chunk ([`Chunked`](TransferMode::Chunked)), or drain to
/// end-of-stream ([`Close`](TransferMode::Close)).
///
/// # Examples
///
/// ```
/// use wiregate::{BodyReader, MessageReader, ResponseHead};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wiregate::Result<()> {
/// let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nabcde";
/// let mut reader = MessageReader::new(&wire[..]);
///
/// let head = ResponseHead::read(&mut reader).await?;
/// let mut body = BodyReader::new(&mut reader, head.transfer_mode());
/// assert_eq!(body.bytes().await, b"abcde");
/// # Ok(())
/// # }
/// ```
pub struct BodyReader<'a, R> {
    reader: &'a mut MessageReader<R>,
    mode: TransferMode,
    elapsed: Option<Duration>,
    cached: Option<Vec<u8>>,
}

impl<'a, R: AsyncRead + Unpin> BodyReader<'a, R> {
    pub fn new(reader: &'a mut MessageReader<R>, mode: TransferMode) -> Self {
        Self {
            reader,
            mode,
            elapsed: None,
            cached: None,
        }
    }

    /// Copies the whole body to `dest` and returns the byte count.
    ///
    /// In chunked mode the terminal chunk is consumed but trailer headers
    /// after it are left in the reader untouched.
    pub async fn copy_to<W: AsyncWrite + Unpin>(&mut self, dest: &mut W) -> Result<u64> {
        let started = Instant::now();

        let copied = match self.mode {
            TransferMode::Length(n) => self.reader.copy_exact_to(n, dest).await?,
            TransferMode::Close => self.reader.copy_to_eof(dest).await?,
            TransferMode::Chunked => {
                let mut copied = 0u64;
                loop {
                    let chunk = self.reader.read_chunk().await?;
                    if chunk.is_empty() {
                        break;
                    }
                    dest.write_all(&chunk).await?;
                    copied += chunk.len() as u64;
                }
                copied
            }
        };

        self.elapsed = Some(started.elapsed());
        Ok(copied)
    }

    /// Buffers the body in memory, caching it on first access.
    ///
    /// A copy failure is logged and cached as an empty body, so repeated
    /// calls stay consistent and never re-touch a broken stream.
    pub async fn bytes(&mut self) -> &[u8] {
        if self.cached.is_none() {
            let mut buf = Vec::new();
            match self.copy_to(&mut buf).await {
                Ok(_) => self.cached = Some(buf),
                Err(err) => {
                    tracing::warn!(error = %err, "body read failed, caching empty body");
                    self.cached = Some(Vec::new());
                }
            }
        }

        self.cached.as_deref().unwrap_or_default()
    }

    /// Wall-clock duration of the last completed copy, if one has run.
    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;

    #[tokio::test]
    async fn length_body() {
        let wire = b"abcde-trailing-bytes";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Length(5));
        let mut out = Vec::new();
        assert_eq!(body.copy_to(&mut out).await.unwrap(), 5);
        assert_eq!(out, b"abcde");
        assert!(body.elapsed().is_some());
    }

    #[tokio::test]
    async fn close_body_reads_to_eof() {
        let wire = b"everything until the stream ends";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Close);
        let mut out = Vec::new();
        assert_eq!(body.copy_to(&mut out).await.unwrap(), wire.len() as u64);
        assert_eq!(out, wire);
    }

    #[tokio::test]
    async fn chunked_body() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Chunked);
        let mut out = Vec::new();
        assert_eq!(body.copy_to(&mut out).await.unwrap(), 9);
        assert_eq!(out, b"Wikipedia");
    }

    #[tokio::test]
    async fn chunked_leaves_trailers_readable() {
        let wire = b"3\r\nabc\r\n0\r\nExpires: never\r\n\r\n";
        let mut r = MessageReader::new(&wire[..]);

        let mut out = Vec::new();
        BodyReader::new(&mut r, TransferMode::Chunked)
            .copy_to(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"abc");

        // Trailer headers stay in the reader, undamaged.
        let trailer = r.read_header().await.unwrap();
        assert_eq!(trailer.value(), "never");
        assert!(r.read_crlf().await.unwrap());
    }

    #[tokio::test]
    async fn bytes_caches_first_read() {
        let wire = b"abcde";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Length(5));
        assert_eq!(body.bytes().await, b"abcde");
        // The stream is exhausted; a second call must serve the cache.
        assert_eq!(body.bytes().await, b"abcde");
    }

    #[tokio::test]
    async fn bytes_caches_empty_on_failure() {
        // Declared 10 bytes, only 3 on the wire.
        let wire = b"abc";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Length(10));
        assert_eq!(body.bytes().await, b"");
        assert_eq!(body.bytes().await, b"");
    }

    #[tokio::test]
    async fn empty_length_body() {
        let wire = b"";
        let mut r = MessageReader::new(&wire[..]);

        let mut body = BodyReader::new(&mut r, TransferMode::Length(0));
        let mut out = Vec::new();
        assert_eq!(body.copy_to(&mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }
}
