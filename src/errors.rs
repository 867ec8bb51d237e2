//! Error taxonomy for the acceptor and the HTTP message parser.
//!
//! Two families matter to callers:
//! - transport errors ([`Error::Io`]) — recovered at the boundary that saw
//!   them: a read failure aborts its task, an accept failure not caused by
//!   shutdown aborts the accept loop;
//! - malformed-message errors (the parse variants) — surfaced to the task
//!   that drove the parse, never silently defaulted.
//!
//! Over-capacity admission and shutdown-induced accept errors are *not*
//! errors in this taxonomy; both are normal operation and handled as data
//! inside the acceptor.

use std::io;
use thiserror::Error;

/// Errors produced while accepting connections or parsing HTTP messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A transport-level failure from the underlying socket or stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The start line was empty or did not split into the expected tokens.
    #[error("malformed start line: {0:?}")]
    BadStartLine(String),

    /// A response status code did not parse as an integer.
    #[error("invalid status code: {0:?}")]
    BadStatusCode(String),

    /// A header field name was not followed by a colon.
    #[error("header field without colon: {0:?}")]
    HeaderMissingColon(String),

    /// A `Content-Length` value did not parse as a non-negative integer.
    #[error("invalid Content-Length: {0:?}")]
    BadContentLength(String),

    /// A chunk-size line did not start with hex digits.
    #[error("invalid chunk size line: {0:?}")]
    BadChunkSize(String),

    /// A chunk's data was not followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    BadChunkTerminator,

    /// The stream ended in the middle of a message element.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

impl Error {
    /// Returns `true` for transport errors, `false` for parse errors.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod errors_tests {
    use super::*;

    #[test]
    fn transport_split() {
        let io = Error::from(io::Error::new(io::ErrorKind::TimedOut, "read timeout"));
        assert!(io.is_transport());

        let parse = Error::BadStartLine(String::new());
        assert!(!parse.is_transport());
    }

    #[test]
    fn display_names_the_input() {
        let err = Error::HeaderMissingColon("Host".into());
        assert!(err.to_string().contains("Host"));
    }
}
