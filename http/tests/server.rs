//! End-to-end HTTP behavior over loopback sockets: keep-alive, routing,
//! static files and the oversize-request error path.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use vev_http::HttpServer;

fn start_server(port: u16, base_dir: Option<String>) {
    thread::spawn(move || {
        let mut server = HttpServer::new(port);
        server.set_thread_count(1);
        if let Some(dir) = base_dir {
            server.set_base_dir(dir);
        }
        server.get("/hello", |req, resp| {
            let u = req.param("u").unwrap_or("").to_string();
            let p = req.param("p").unwrap_or("").to_string();
            resp.set_content(format!("u={u} p={p}"), "text/plain");
        });
        server.listen()
    });
    thread::sleep(Duration::from_millis(300));
}

// Reads until the stream goes quiet for a read-timeout interval or closes.
fn read_response(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(800)))
        .unwrap();
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    start_server(18631, None);
    let mut stream = TcpStream::connect(("127.0.0.1", 18631)).unwrap();

    stream
        .write_all(b"GET /hello?u=a&p=1%202 HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let first = read_response(&mut stream);
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "got: {first}");
    assert!(first.contains("Connection: keep-alive"), "got: {first}");
    assert!(first.contains("u=a p=1 2"), "got: {first}");

    // The context must have been reset; a second request on the same
    // connection parses from scratch.
    stream
        .write_all(b"GET /hello?u=b&p=3 HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let second = read_response(&mut stream);
    assert!(second.contains("u=b p=3"), "got: {second}");
}

#[test]
fn close_requests_are_answered_then_closed() {
    start_server(18632, None);
    let mut stream = TcpStream::connect(("127.0.0.1", 18632)).unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.contains("Connection: close"), "got: {response}");

    // The server should have half-closed; a subsequent read sees EOF.
    let mut chunk = [0u8; 16];
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(0, stream.read(&mut chunk).unwrap_or(0));
}

#[test]
fn unrouted_paths_get_a_404_page() {
    start_server(18633, None);
    let mut stream = TcpStream::connect(("127.0.0.1", 18633)).unwrap();
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "got: {response}");
    assert!(response.contains("Content-Type: text/html"), "got: {response}");
}

#[test]
fn oversize_request_line_gets_a_414_then_half_close() {
    start_server(18634, None);
    let mut stream = TcpStream::connect(("127.0.0.1", 18634)).unwrap();
    let long_line = vec![b'a'; 10_000];
    stream.write_all(&long_line).unwrap();
    let response = read_response(&mut stream);
    assert!(
        response.starts_with("HTTP/1.1 414 URI Too Long\r\n"),
        "got: {response}"
    );
}

#[test]
fn static_files_are_served_with_their_mime_type() {
    let dir = std::env::temp_dir().join("vev-http-static-test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<h1>it works</h1>").unwrap();
    start_server(18635, Some(dir.to_string_lossy().into_owned()));

    let mut stream = TcpStream::connect(("127.0.0.1", 18635)).unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(response.contains("Content-Type: text/html"), "got: {response}");
    assert!(response.contains("<h1>it works</h1>"), "got: {response}");

    // A trailing slash resolves to the directory's index.html.
    let mut stream = TcpStream::connect(("127.0.0.1", 18635)).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);
    assert!(response.contains("<h1>it works</h1>"), "got: {response}");
}
