//! Socket-level integration tests: a real `Server` bound to an ephemeral
//! loopback port, driven by a plain `tokio::net::TcpStream` client. No mock
//! reader/writer is introduced — a loopback socket already satisfies
//! everything the connection loop needs.

use httpcore::limits::ConnLimits;
use httpcore::{ConnectionData, Handled, Handler, Request, Response, Server, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Per-connection request counter, shared by every test handler below so
/// the pipelining and max-requests scenarios can tell requests apart.
struct Counter {
    count: usize,
}

impl ConnectionData for Counter {
    fn new() -> Self {
        Counter { count: 0 }
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

struct EchoHandler;

impl Handler<Counter> for EchoHandler {
    async fn handle(&self, data: &mut Counter, req: &Request, resp: &mut Response) -> Handled {
        data.count += 1;

        match req.url().path() {
            b"/echo" => resp
                .status(StatusCode::Ok)
                .body(req.body().unwrap_or(&[])),
            _ => resp
                .status(StatusCode::Ok)
                .header("x-request-count", data.count)
                .body(format!("req#{}", data.count)),
        }
    }
}

async fn spawn_server(conn_limits: ConnLimits) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::builder()
        .listener(listener)
        .handler(EchoHandler)
        .connection_limits(conn_limits)
        .build();

    tokio::spawn(server.launch());
    addr
}

async fn read_some(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn simple_get_request() {
    let addr = spawn_server(ConnLimits::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();

    let response = read_some(&mut client).await;
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("req#1"), "{text}");
}

#[tokio::test]
async fn pipelined_two_requests_answered_in_order() {
    let addr = spawn_server(ConnLimits::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(
            b"GET /a HTTP/1.1\r\nHost: test\r\n\r\n\
              GET /b HTTP/1.1\r\nHost: test\r\n\r\n",
        )
        .await
        .unwrap();

    // Both responses may arrive in one read or two; accumulate until both
    // status lines have shown up.
    let mut buf = Vec::new();
    while buf.windows(4).filter(|w| *w == b"req#").count() < 2 {
        let chunk = read_some(&mut client).await;
        assert!(!chunk.is_empty(), "connection closed early: {buf:?}");
        buf.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&buf);
    let first = text.find("req#1").expect("first response");
    let second = text.find("req#2").expect("second response");
    assert!(first < second, "responses arrived out of order: {text}");
}

#[tokio::test]
async fn connection_close_header_ends_the_socket() {
    let addr = spawn_server(ConnLimits::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let response = read_some(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.to_ascii_lowercase().contains("connection: close"), "{text}");

    // The server must have no more to say: the next read observes EOF.
    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "expected EOF after Connection: close");
}

#[tokio::test]
async fn max_requests_per_connection_closes_after_the_boundary() {
    let addr = spawn_server(ConnLimits {
        max_requests_per_connection: 2,
        ..ConnLimits::default()
    })
    .await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let one_request = b"GET /x HTTP/1.1\r\nHost: test\r\n\r\n".to_vec();
    let mut wire = Vec::new();
    for _ in 0..3 {
        wire.extend_from_slice(&one_request);
    }
    client.write_all(&wire).await.unwrap();

    let mut buf = Vec::new();
    loop {
        let chunk = read_some(&mut client).await;
        if chunk.is_empty() {
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&buf);
    assert_eq!(text.matches("req#1").count(), 1, "{text}");
    assert_eq!(text.matches("req#2").count(), 1, "{text}");
    assert!(!text.contains("req#3"), "third request should go unhandled: {text}");
}

#[tokio::test]
async fn chunked_request_body_is_decoded() {
    let addr = spawn_server(ConnLimits::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(
            b"POST /echo HTTP/1.1\r\n\
              Host: test\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n\
              4\r\nwiki\r\n\
              5\r\npedia\r\n\
              0\r\n\r\n",
        )
        .await
        .unwrap();

    let mut buf = Vec::new();
    while !String::from_utf8_lossy(&buf).contains("wikipedia") {
        let chunk = read_some(&mut client).await;
        assert!(!chunk.is_empty(), "connection closed before the body arrived");
        buf.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&buf);
    assert!(text.ends_with("wikipedia"), "{text}");
}

#[tokio::test]
async fn bare_lf_in_a_header_line_is_rejected() {
    let addr = spawn_server(ConnLimits::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // "bar\nEvil: 1" puts a bare LF (no preceding CR) inside what looks
    // like a header value — an attempt to smuggle a second header/request
    // past the line parser rather than a properly CRLF-delimited one.
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\nX-Foo: bar\nEvil: 1\r\n\r\n")
        .await
        .unwrap();

    let response = read_some(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
}

#[tokio::test]
async fn keep_alive_timeout_closes_an_idle_connection() {
    let addr = spawn_server(ConnLimits {
        keep_alive_timeout: Duration::from_millis(100),
        ..ConnLimits::default()
    })
    .await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let _ = read_some(&mut client).await;

    // No second request is ever sent; the idle read deadline should close
    // the socket cleanly rather than hang forever.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("server never closed the idle connection")
        .unwrap();
    assert_eq!(n, 0);
}
