//! End-to-end echo and idle-eviction behavior over loopback sockets.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use vev::connection::{AnyEventCallback, ClosedCallback, ConnectedCallback, MessageCallback};
use vev::{Buffer, Connection, TcpServer};

fn start_echo_server(port: u16, idle_timeout: u32) {
    thread::spawn(move || {
        let mut server = TcpServer::new(port);
        server.set_thread_count(1);
        server.set_idle_timeout(idle_timeout);
        server.set_message_callback(|conn, buf| {
            let payload = buf.read_out(buf.len());
            conn.send(&payload);
        });
        server.start()
    });
    // Give the listener a moment to come up.
    thread::sleep(Duration::from_millis(300));
}

fn read_some(stream: &mut TcpStream) -> Vec<u8> {
    let mut chunk = [0u8; 1024];
    match stream.read(&mut chunk) {
        Ok(n) => chunk[..n].to_vec(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn echoes_every_message_on_a_long_lived_connection() {
    start_echo_server(18531, 10);
    let mut stream = TcpStream::connect(("127.0.0.1", 18531)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    for _ in 0..5 {
        stream.write_all(b"hello world!").unwrap();
        let mut echoed = Vec::new();
        while echoed.len() < 12 {
            let chunk = read_some(&mut stream);
            assert!(!chunk.is_empty(), "echo never arrived");
            echoed.extend_from_slice(&chunk);
        }
        assert_eq!(b"hello world!".to_vec(), echoed);
        thread::sleep(Duration::from_millis(200));
    }
}

#[test]
fn idle_connection_is_evicted() {
    start_echo_server(18532, 2);
    let mut stream = TcpStream::connect(("127.0.0.1", 18532)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(6)))
        .unwrap();

    stream.write_all(b"ping").unwrap();
    let mut echoed = Vec::new();
    while echoed.len() < 4 {
        let chunk = read_some(&mut stream);
        assert!(!chunk.is_empty(), "echo never arrived");
        echoed.extend_from_slice(&chunk);
    }

    // Stay silent; the server should close the connection once the idle
    // timeout lapses. The wheel ticks in whole seconds, so allow a window.
    let started = Instant::now();
    let eof = read_some(&mut stream);
    assert!(eof.is_empty(), "expected the server to close the connection");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1), "evicted too early: {waited:?}");
    assert!(waited < Duration::from_secs(5), "evicted too late: {waited:?}");
}

#[test]
fn protocol_upgrade_swaps_callbacks_in_place() {
    thread::spawn(move || {
        let mut server = TcpServer::new(18534);
        server.set_thread_count(1);
        // The first message upgrades the connection to a shouting echo; every
        // later message must go through the new callback set.
        server.set_message_callback(|conn, buf| {
            let _greeting = buf.read_out(buf.len());
            let message: MessageCallback = Rc::new(|conn: &Rc<Connection>, buf: &mut Buffer| {
                let shout = buf.read_out(buf.len()).to_ascii_uppercase();
                conn.send(&shout);
            });
            let connected: ConnectedCallback = Rc::new(|_| {});
            let closed: ClosedCallback = Rc::new(|_| {});
            let event: AnyEventCallback = Rc::new(|_| {});
            conn.upgrade(Box::new(()), connected, message, closed, event);
            conn.send(b"upgraded");
        });
        server.start()
    });
    thread::sleep(Duration::from_millis(300));

    let mut stream = TcpStream::connect(("127.0.0.1", 18534)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    stream.write_all(b"hi").unwrap();
    let mut reply = Vec::new();
    while reply.len() < 8 {
        let chunk = read_some(&mut stream);
        assert!(!chunk.is_empty(), "upgrade ack never arrived");
        reply.extend_from_slice(&chunk);
    }
    assert_eq!(b"upgraded".to_vec(), reply);

    stream.write_all(b"abc").unwrap();
    let mut reply = Vec::new();
    while reply.len() < 3 {
        let chunk = read_some(&mut stream);
        assert!(!chunk.is_empty(), "post-upgrade echo never arrived");
        reply.extend_from_slice(&chunk);
    }
    assert_eq!(b"ABC".to_vec(), reply);
}

#[test]
fn activity_defers_idle_eviction() {
    start_echo_server(18533, 2);
    let mut stream = TcpStream::connect(("127.0.0.1", 18533)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // Keep the connection busier than the timeout for longer than the
    // timeout itself; it must survive the whole run.
    for _ in 0..4 {
        thread::sleep(Duration::from_millis(900));
        stream.write_all(b"still here").unwrap();
        let mut echoed = Vec::new();
        while echoed.len() < 10 {
            let chunk = read_some(&mut stream);
            assert!(!chunk.is_empty(), "connection was evicted while active");
            echoed.extend_from_slice(&chunk);
        }
        assert_eq!(b"still here".to_vec(), echoed);
    }
}
