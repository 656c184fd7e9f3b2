//! A test client for the echo example: sends a greeting once a second and
//! prints whatever comes back. Run `examples/echo` first.

use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use vev::socket::Socket;

fn main() {
    let socket = Socket::create_client(Ipv4Addr::LOCALHOST, 8500)
        .expect("is the echo example running on port 8500?");

    let mut chunk = [0u8; 1024];
    for round in 0..10 {
        let message = format!("hello world #{round}");
        socket.send(message.as_bytes()).expect("send failed");
        thread::sleep(Duration::from_secs(1));
        match socket.recv(&mut chunk) {
            Ok(0) => {
                println!("server closed the connection");
                return;
            }
            Ok(n) => println!("echo: {}", String::from_utf8_lossy(&chunk[..n])),
            Err(e) => println!("no reply yet: {e}"),
        }
    }
}
