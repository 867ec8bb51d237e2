//! wiregate - Bounded-concurrency TCP acceptor with streaming HTTP/1.1 framing
//!
//! A connection-accepting server core built on Tokio: it binds a listener,
//! admits connections under a configurable concurrency limit (reject or wait
//! when full), and hands each accepted socket to a pluggable Task Factory.
//! On top of the raw stream it provides a pushback-capable reader with
//! HTTP/1.1 parsing primitives, typed request/response heads, and body
//! transfer in all three framing modes (content-length, chunked, read-to-close).
//!
//! This is not a web framework: there is no routing and no response
//! generation. It accepts sockets, dispatches per-connection work, and
//! parses or reassembles HTTP message framing on streams you drive yourself.
//!
//! # Layers
//!
//! - [`Acceptor`] — accept loop with admission control and shutdown
//! - [`ClientConnection`] / [`TaskFactory`] — per-socket task dispatch
//! - [`MessageReader`] — streaming parse primitives (token, line, header, chunk)
//! - [`RequestHead`] / [`ResponseHead`] — typed heads with transfer-mode resolution
//! - [`BodyReader`] — mode-appropriate body copy
//!
//! # Examples
//!
//! A minimal server that parses a request head and answers with a fixed
//! response:
//! ```no_run
//! use std::sync::Arc;
//! use tokio::io::AsyncWriteExt;
//! use wiregate::{
//!     Acceptor, AcceptorLimits, BodyReader, ClientConnection, Error, MessageReader,
//!     RequestHead, SingleTask,
//! };
//!
//! #[tokio::main]
//! async fn main() -> wiregate::Result<()> {
//!     let acceptor = Acceptor::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .limits(AcceptorLimits {
//!             max_connections: Some(500),
//!             reject_when_busy: true,
//!             ..AcceptorLimits::default()
//!         })
//!         .factory(SingleTask::new(|conn: Arc<ClientConnection>| async move {
//!             let (read, mut write) = conn.take_io().ok_or(Error::UnexpectedEof)?;
//!             let mut reader = MessageReader::with_timeout(read, conn.read_timeout());
//!
//!             let head = RequestHead::read(&mut reader).await?;
//!             let mut body = BodyReader::new(&mut reader, head.transfer_mode());
//!             let _ = body.bytes().await;
//!
//!             write
//!                 .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
//!                 .await?;
//!             Ok(())
//!         }))
//!         .build()?;
//!
//!     acceptor.run().await
//! }
//! ```
//!
//! Parsing a response off any `AsyncRead`, no server involved:
//! ```
//! use wiregate::{BodyReader, MessageReader, ResponseHead};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> wiregate::Result<()> {
//! let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
//!              4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
//! let mut reader = MessageReader::new(&wire[..]);
//!
//! let head = ResponseHead::read(&mut reader).await?;
//! assert!(head.is_okay());
//!
//! let mut body = BodyReader::new(&mut reader, head.transfer_mode());
//! assert_eq!(body.bytes().await, b"Wikipedia");
//! # Ok(())
//! # }
//! ```

pub(crate) mod http {
    pub(crate) mod body;
    pub mod chars;
    pub(crate) mod headers;
    pub(crate) mod message;
    pub(crate) mod reader;
}
pub(crate) mod server {
    pub(crate) mod acceptor;
    pub(crate) mod connection;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{Error, Result},
    http::{
        body::BodyReader,
        chars,
        headers::{HeaderBlock, HeaderField},
        message::{RequestHead, ResponseHead, TransferMode},
        reader::MessageReader,
    },
    limits::AcceptorLimits,
    server::{
        acceptor::{AcceptFilter, Acceptor, AcceptorBuilder, AcceptorHandle, AcceptorState},
        connection::{ClientConnection, ConnTask, FaultHook, SingleTask, TaskFactory},
    },
};
