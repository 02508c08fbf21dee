//! Literal wire-level scenarios driven against a real loopback socket.

use mhttpd::{ConnConfig, Daemon, DaemonConfig, Handler, HandlerError, RequestView, Response, ResponseBuilder, StatusCode, TerminationCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct FixedBody(&'static str);

impl Handler for FixedBody {
    async fn handle(&self, _request: &RequestView<'_>) -> Result<Response, HandlerError> {
        let (resp, _handled) = ResponseBuilder::new().status(StatusCode::Ok).body(self.0);
        Ok(resp)
    }
}

struct EchoBody;

impl Handler for EchoBody {
    async fn handle(&self, request: &RequestView<'_>) -> Result<Response, HandlerError> {
        let body = request.body().unwrap_or(&[]).to_vec();
        let (resp, _handled) = ResponseBuilder::new().status(StatusCode::Ok).body(body);
        Ok(resp)
    }
}

struct AlwaysFails;

impl Handler for AlwaysFails {
    async fn handle(&self, _request: &RequestView<'_>) -> Result<Response, HandlerError> {
        Err("handler deliberately failed".into())
    }
}

struct SlowBody;

impl Handler for SlowBody {
    async fn handle(&self, _request: &RequestView<'_>) -> Result<Response, HandlerError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let (resp, _handled) = ResponseBuilder::new().status(StatusCode::Ok).body("too late");
        Ok(resp)
    }
}

async fn read_available(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(300), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
            Ok(Err(_)) => break,
        }
    }
    out
}

#[tokio::test]
async fn get_with_connection_close() {
    let daemon = Daemon::builder().handler(FixedBody("hello, world\n")).start().await.unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

    let response = read_available(&mut client).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"), "{text}");
    assert!(text.contains("Content-Length: 13\r\n"), "{text}");
    assert!(text.contains("Connection: close\r\n"), "{text}");
    assert!(text.ends_with("\r\n\r\nhello, world\n"), "{text}");

    let mut trailing = [0u8; 1];
    let eof = client.read(&mut trailing).await.unwrap();
    assert_eq!(eof, 0, "socket should be closed by the server");

    daemon.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn keep_alive_pipelines_two_responses_in_order() {
    let daemon = Daemon::builder().handler(FixedBody("ok")).start().await.unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let response = read_available(&mut client).await;
    let text = String::from_utf8(response).unwrap();
    let occurrences = text.matches("HTTP/1.1 200 OK").count();
    assert_eq!(occurrences, 2, "{text}");
    assert!(text.contains("Connection: keep-alive\r\n"), "{text}");

    daemon.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn expect_continue_then_body_then_response() {
    let daemon = Daemon::builder().handler(EchoBody).start().await.unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client
        .write_all(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\n")
        .await
        .unwrap();

    let mut interim = [0u8; 25];
    client.read_exact(&mut interim).await.unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"abcd").await.unwrap();
    let response = read_available(&mut client).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("abcd"), "{text}");

    daemon.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn chunked_request_body_is_reassembled() {
    let daemon = Daemon::builder().handler(EchoBody).start().await.unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client
        .write_all(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
        .await
        .unwrap();

    let response = read_available(&mut client).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("hello"), "{text}");

    daemon.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn malformed_request_is_rejected_and_reported() {
    let completions: Arc<Mutex<Vec<TerminationCode>>> = Arc::new(Mutex::new(Vec::new()));
    let completions_clone = completions.clone();
    let daemon = Daemon::builder()
        .handler(FixedBody("unreachable"))
        .notify_completed(move |_peer, code| completions_clone.lock().unwrap().push(code))
        .start()
        .await
        .unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client.write_all(b"GET /\x00 HTTP/1.1\r\n\r\n").await.unwrap();

    let response = read_available(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"), "{text}");
    assert!(text.contains("Connection: close"), "{text}");

    daemon.stop(Duration::from_secs(1)).await;
    assert_eq!(*completions.lock().unwrap(), vec![TerminationCode::WithError]);
}

#[tokio::test]
async fn application_error_gets_500_but_keeps_connection_alive() {
    let completions: Arc<Mutex<Vec<TerminationCode>>> = Arc::new(Mutex::new(Vec::new()));
    let completions_clone = completions.clone();
    let daemon = Daemon::builder()
        .handler(AlwaysFails)
        .notify_completed(move |_peer, code| completions_clone.lock().unwrap().push(code))
        .start()
        .await
        .unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let response = read_available(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    let occurrences = text.matches("HTTP/1.1 500").count();
    assert_eq!(occurrences, 2, "{text}");

    daemon.stop(Duration::from_secs(1)).await;
    assert_eq!(*completions.lock().unwrap(), vec![TerminationCode::CompletedOk]);
}

#[tokio::test]
async fn stop_reports_daemon_shutdown_for_stragglers() {
    let completions: Arc<Mutex<Vec<TerminationCode>>> = Arc::new(Mutex::new(Vec::new()));
    let completions_clone = completions.clone();
    let daemon = Daemon::builder()
        .handler(SlowBody)
        .notify_completed(move |_peer, code| completions_clone.lock().unwrap().push(code))
        .start()
        .await
        .unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    daemon.stop(Duration::from_millis(100)).await;
    assert_eq!(*completions.lock().unwrap(), vec![TerminationCode::DaemonShutdown]);
}

#[tokio::test]
async fn idle_connection_times_out_without_a_response() {
    let mut config = DaemonConfig::default();
    config.conn = ConnConfig {
        idle_timeout: Duration::from_millis(100),
        ..ConnConfig::default()
    };
    let daemon = Daemon::builder().config(config).handler(FixedBody("unreachable")).start().await.unwrap();
    let mut client = TcpStream::connect(daemon.local_addr()).await.unwrap();
    client.write_all(b"GET ").await.unwrap();

    let response = read_available(&mut client).await;
    assert!(response.is_empty(), "server must not write anything before closing on timeout");

    let mut trailing = [0u8; 1];
    let eof = tokio::time::timeout(Duration::from_millis(500), client.read(&mut trailing)).await.unwrap().unwrap();
    assert_eq!(eof, 0);

    daemon.stop(Duration::from_secs(1)).await;
}
