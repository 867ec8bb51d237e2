//! Full-stack round trips: a real acceptor, a real socket, request parsed
//! and body echoed back through the crate's own reader.

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use wiregate::{
    Acceptor, AcceptorLimits, BodyReader, ClientConnection, Error, MessageReader, RequestHead,
    ResponseHead, SingleTask, TaskFactory,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parses one request, echoes its body back with a Content-Length framing.
fn echo_factory() -> impl TaskFactory {
    SingleTask::new(|conn: Arc<ClientConnection>| async move {
        let (read, mut write) = conn.take_io().ok_or(Error::UnexpectedEof)?;
        let mut reader = MessageReader::with_timeout(read, conn.read_timeout());

        let head = RequestHead::read(&mut reader).await?;
        let mut body = BodyReader::new(&mut reader, head.transfer_mode());
        let echoed = body.bytes().await.to_vec();

        let status = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", echoed.len());
        write.write_all(status.as_bytes()).await?;
        write.write_all(&echoed).await?;
        Ok(())
    })
}

async fn spawn_echo_server() -> (std::net::SocketAddr, wiregate::AcceptorHandle) {
    let acceptor = Acceptor::builder()
        .bind("127.0.0.1:0".parse().unwrap())
        .factory(echo_factory())
        .limits(AcceptorLimits {
            max_connections: Some(4),
            ..AcceptorLimits::default()
        })
        .build()
        .unwrap();

    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.handle();
    tokio::spawn(acceptor.run());
    (addr, handle)
}

async fn round_trip(addr: std::net::SocketAddr, request: &[u8]) -> (u16, Vec<u8>) {
    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    client.write_all(request).await.unwrap();

    let (read, _write) = client.into_split();
    let mut reader = MessageReader::new(read);

    let head = ResponseHead::read(&mut reader).await.unwrap();
    let mut body = BodyReader::new(&mut reader, head.transfer_mode());
    let bytes = body.bytes().await.to_vec();
    (head.status(), bytes)
}

#[tokio::test]
async fn length_framed_request_echoes() {
    init_tracing();
    let (addr, handle) = spawn_echo_server().await;

    let (status, body) =
        round_trip(addr, b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"hello");

    handle.shutdown();
}

#[tokio::test]
async fn chunked_request_reassembles() {
    init_tracing();
    let (addr, handle) = spawn_echo_server().await;

    let request = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
    let (status, body) = round_trip(addr, request).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"Wikipedia");

    handle.shutdown();
}

#[tokio::test]
async fn sequential_connections_reuse_slots() {
    init_tracing();
    let (addr, handle) = spawn_echo_server().await;

    for i in 0..8 {
        let payload = format!("req-{i}");
        let request = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{payload}",
            payload.len()
        );
        let (status, body) = round_trip(addr, request.as_bytes()).await;
        assert_eq!(status, 200);
        assert_eq!(body, payload.as_bytes());
    }

    assert_eq!(handle.accepted(), 8);
    assert_eq!(handle.rejected(), 0);
    handle.shutdown();
}
