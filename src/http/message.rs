//! Typed request/response heads parsed from a [`MessageReader`], including
//! transfer-mode resolution.

use crate::{
    errors::{Error, Result},
    http::{headers::HeaderBlock, reader::MessageReader},
};
use tokio::io::AsyncRead;

const VERSION_PREFIX: &str = "HTTP/";
const VERSION_11: &str = "HTTP/1.1";

/// How the end of a message body is determined.
///
/// Resolved exactly once, after the header block and before any body access,
/// with this precedence:
///
/// 1. `Transfer-Encoding` present with a first token other than `identity`
///    (case-insensitive) ⇒ [`Chunked`](TransferMode::Chunked);
/// 2. else `Content-Length` present ⇒ [`Length`](TransferMode::Length)
///    (the value must parse as a non-negative integer);
/// 3. else `Connection` present with first token `close` (case-insensitive)
///    ⇒ [`Close`](TransferMode::Close);
/// 4. else [`Close`](TransferMode::Close).
///
/// # Known limitation
///
/// The default of `Close` predates HTTP/1.1's implicit persistent
/// connections: a compliant 1.1 peer that sent neither `Content-Length` nor
/// `Transfer-Encoding` may keep its socket open expecting further requests,
/// while this mode reads to end-of-stream. The behavior is kept as-is rather
/// than silently changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Body is exactly this many bytes.
    Length(u64),
    /// Body is chunked-transfer encoded; a zero-length chunk terminates it.
    Chunked,
    /// Body runs until the connection closes.
    Close,
}

/// Resolves the transfer mode from a header block.
///
/// Pure function of the `Transfer-Encoding`, `Content-Length` and
/// `Connection` header values; see [`TransferMode`] for the precedence.
pub fn resolve_transfer_mode(headers: &HeaderBlock) -> Result<TransferMode> {
    if let Some(te) = headers.get("Transfer-Encoding") {
        let identity = te
            .first_token()
            .is_some_and(|t| t.eq_ignore_ascii_case("identity"));
        if !identity {
            return Ok(TransferMode::Chunked);
        }
    }

    if let Some(cl) = headers.get("Content-Length") {
        let len = cl
            .value()
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::BadContentLength(cl.value().to_owned()))?;
        return Ok(TransferMode::Length(len));
    }

    if let Some(conn) = headers.get("Connection") {
        if conn
            .first_token()
            .is_some_and(|t| t.eq_ignore_ascii_case("close"))
        {
            return Ok(TransferMode::Close);
        }
    }

    Ok(TransferMode::Close)
}

/// Reads start line + header block, leaving the reader positioned at the
/// first body byte. Shared by the request and response variants.
async fn read_block<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) -> Result<HeaderBlock> {
    let start = reader.read_line().await?.ok_or(Error::UnexpectedEof)?;
    if start.is_empty() {
        return Err(Error::BadStartLine(start));
    }

    let mut block = HeaderBlock::new();
    block.init(start);

    loop {
        if reader.read_crlf().await? {
            break;
        }
        block.put(reader.read_header().await?);
    }

    Ok(block)
}

fn is_keep_alive(version: &str, headers: &HeaderBlock) -> bool {
    version == VERSION_11
        && headers
            .value("Connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("keep-alive"))
}

/// A parsed HTTP request head: method, URI, version, headers and resolved
/// transfer mode. Immutable after parse.
///
/// # Examples
///
/// ```
/// use wiregate::{MessageReader, RequestHead, TransferMode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wiregate::Result<()> {
/// let wire = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
/// let mut reader = MessageReader::new(&wire[..]);
///
/// let head = RequestHead::read(&mut reader).await?;
/// assert_eq!(head.method(), "GET");
/// assert_eq!(head.uri(), "/x");
/// assert_eq!(head.transfer_mode(), TransferMode::Close);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RequestHead {
    method: String,
    uri: String,
    version: String,
    headers: HeaderBlock,
    mode: TransferMode,
}

impl RequestHead {
    /// Parses `METHOD SP URI SP VERSION CRLF`, the header block, and the
    /// terminating bare CRLF. An empty URI normalizes to `/`.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) -> Result<Self> {
        let headers = read_block(reader).await?;

        let start = headers.start_line().to_owned();
        let tokens: Vec<&str> = start.split(' ').collect();
        let [method, uri, version] = tokens[..] else {
            return Err(Error::BadStartLine(start));
        };

        if !version.starts_with(VERSION_PREFIX) {
            return Err(Error::BadStartLine(start));
        }

        let uri = if uri.is_empty() { "/" } else { uri };
        let mode = resolve_transfer_mode(&headers)?;

        Ok(Self {
            method: method.to_owned(),
            uri: uri.to_owned(),
            version: version.to_owned(),
            headers,
            mode,
        })
    }

    #[inline(always)]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline(always)]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[inline(always)]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline(always)]
    pub fn headers(&self) -> &HeaderBlock {
        &self.headers
    }

    #[inline(always)]
    pub fn transfer_mode(&self) -> TransferMode {
        self.mode
    }

    /// The declared body length, when the transfer mode is length-delimited.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        match self.mode {
            TransferMode::Length(n) => Some(n),
            _ => None,
        }
    }

    /// `true` when the version is exactly `HTTP/1.1` and a `Connection`
    /// header value contains `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        is_keep_alive(&self.version, &self.headers)
    }
}

/// A parsed HTTP response head: version, status, reason, headers and
/// resolved transfer mode. Immutable after parse.
#[derive(Debug)]
pub struct ResponseHead {
    version: String,
    status: u16,
    reason: String,
    headers: HeaderBlock,
    mode: TransferMode,
}

impl ResponseHead {
    /// Parses `VERSION SP STATUS SP REASON CRLF`, the header block, and the
    /// terminating bare CRLF. The reason phrase may span multiple tokens
    /// and may be empty.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) -> Result<Self> {
        let headers = read_block(reader).await?;

        let start = headers.start_line().to_owned();
        let mut tokens = start.split(' ');

        let version = match tokens.next() {
            Some(v) if v.starts_with(VERSION_PREFIX) => v.to_owned(),
            _ => return Err(Error::BadStartLine(start)),
        };

        let status_token = tokens.next().ok_or_else(|| Error::BadStartLine(start.clone()))?;
        let status: u16 = status_token
            .parse()
            .map_err(|_| Error::BadStatusCode(status_token.to_owned()))?;

        let reason = tokens.collect::<Vec<_>>().join(" ");
        let mode = resolve_transfer_mode(&headers)?;

        Ok(Self {
            version,
            status,
            reason,
            headers,
            mode,
        })
    }

    #[inline(always)]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline(always)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[inline(always)]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[inline(always)]
    pub fn headers(&self) -> &HeaderBlock {
        &self.headers
    }

    #[inline(always)]
    pub fn transfer_mode(&self) -> TransferMode {
        self.mode
    }

    /// The declared body length, when the transfer mode is length-delimited.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        match self.mode {
            TransferMode::Length(n) => Some(n),
            _ => None,
        }
    }

    /// `true` for a 2xx status.
    #[inline(always)]
    pub fn is_okay(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// `true` for 100 Continue.
    #[inline(always)]
    pub fn is_continue(&self) -> bool {
        self.status == 100
    }

    /// `true` when the version is exactly `HTTP/1.1` and a `Connection`
    /// header value contains `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        is_keep_alive(&self.version, &self.headers)
    }
}
