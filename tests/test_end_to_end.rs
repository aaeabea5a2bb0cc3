//! Full request pipeline over real TCP: accept loop, parser, routing, files.

mod common;

use common::{header_value, split_response, TempDir};
use prefork_httpd::files::StaticFileServer;
use prefork_httpd::server::listener::{bind_shared, serve};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct TestServer {
    addr: SocketAddr,
    _root: TempDir,
}

async fn start_server() -> TestServer {
    let root = TempDir::new("e2e");
    root.write("index.html", b"<html><body>Hello</body></html>");
    root.write("notes.txt", b"plain text");
    root.mkdir("assets");

    let std_listener = bind_shared("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = TcpListener::from_std(std_listener).unwrap();
    let addr = listener.local_addr().unwrap();

    let files = StaticFileServer::new(root.path_str());
    tokio::spawn(async move {
        let _ = serve(listener, &files).await;
    });

    TestServer { addr, _root: root }
}

async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_get_root_serves_index() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let (status, headers, body) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(header_value(&headers, "Content-Type"), Some("text/html"));
    assert_eq!(body, b"<html><body>Hello</body></html>");
    assert_eq!(
        header_value(&headers, "Content-Length"),
        Some(body.len().to_string().as_str())
    );
}

#[tokio::test]
async fn test_get_root_equals_get_index() {
    let server = start_server().await;

    let root = roundtrip(server.addr, b"GET / HTTP/1.1\r\n\r\n").await;
    let index = roundtrip(server.addr, b"GET /index.html HTTP/1.1\r\n\r\n").await;

    assert_eq!(root, index);
}

#[tokio::test]
async fn test_traversal_is_forbidden() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"GET /../../etc/passwd HTTP/1.1\r\n\r\n").await;
    let (status, _, _) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"GET /missing.txt HTTP/1.1\r\n\r\n").await;
    let (status, _, _) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 404 Not Found");
}

#[tokio::test]
async fn test_post_is_method_not_allowed() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"POST / HTTP/1.1\r\n\r\n").await;
    let (status, _, body) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 405 Method Not Allowed");
    assert!(String::from_utf8(body).unwrap().contains("POST"));
}

#[tokio::test]
async fn test_malformed_request_line_is_bad_request() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"XYZ\r\n").await;
    let (status, headers, _) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 400 Bad Request");
    assert_eq!(
        header_value(&headers, "Content-Type"),
        Some("text/html; charset=utf-8")
    );
}

#[tokio::test]
async fn test_unknown_method_is_bad_request() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"DELETE /notes.txt HTTP/1.1\r\n\r\n").await;
    let (status, _, _) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 400 Bad Request");
}

#[tokio::test]
async fn test_directory_is_forbidden() {
    let server = start_server().await;

    let raw = roundtrip(server.addr, b"GET /assets HTTP/1.1\r\n\r\n").await;
    let (status, _, _) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[tokio::test]
async fn test_connection_closed_after_one_response() {
    let server = start_server().await;

    // Two pipelined requests: only the first is answered
    let raw = roundtrip(
        server.addr,
        b"GET /notes.txt HTTP/1.1\r\n\r\nGET /index.html HTTP/1.1\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(raw).unwrap();

    assert_eq!(text.matches("HTTP/1.1 ").count(), 1);
    assert!(text.contains("Connection: close"));
    assert!(text.ends_with("plain text"));
}

#[tokio::test]
async fn test_client_disconnect_does_not_stop_worker() {
    let server = start_server().await;

    // Connect and hang up without sending anything
    drop(TcpStream::connect(server.addr).await.unwrap());

    let raw = roundtrip(server.addr, b"GET /notes.txt HTTP/1.1\r\n\r\n").await;
    let (status, _, body) = split_response(&raw);

    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"plain text");
}
