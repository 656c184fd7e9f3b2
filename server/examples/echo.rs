//! Echo server: every received payload is written straight back.
//!
//! Try it with `nc 127.0.0.1 8500`. Connections silent for ten seconds are
//! evicted.

use vev::TcpServer;

fn main() {
    env_logger::init();

    let mut server = TcpServer::new(8500);
    server.set_thread_count(2);
    server.set_idle_timeout(10);
    server.set_connected_callback(|conn| {
        println!("connection {} up", conn.id());
    });
    server.set_message_callback(|conn, buf| {
        let payload = buf.read_out(buf.len());
        conn.send(&payload);
    });
    server.set_closed_callback(|conn| {
        println!("connection {} down", conn.id());
    });
    server.start()
}
