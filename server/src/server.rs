// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The TCP server: accept on the master loop, serve on the workers.
//!
//! Each accepted descriptor gets a monotonic id and is assigned round-robin
//! to a worker loop, which owns the connection for its whole life. The
//! strong reference lives in the owning thread's connection table; the
//! cross-thread index only maps ids to loop handles, so nothing shared
//! between loops needs more than a brief mutex on assignment and removal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::info;

use crate::acceptor::Acceptor;
use crate::buffer::Buffer;
use crate::connection::Connection;
use crate::event_loop::{EventLoop, LoopHandle};
use crate::pool::LoopPool;

thread_local! {
    // Strong connection ownership, per reactor thread.
    static CONNECTIONS: RefCell<HashMap<u64, Rc<Connection>>> =
        RefCell::new(HashMap::new());
}

type ServerConnectedCallback = Arc<dyn Fn(&Rc<Connection>) + Send + Sync>;
type ServerMessageCallback = Arc<dyn Fn(&Rc<Connection>, &mut Buffer) + Send + Sync>;

struct ServerShared {
    next_id: AtomicU64,
    // id -> owning loop, for introspection and cross-thread routing.
    index: Mutex<HashMap<u64, LoopHandle>>,
    idle_timeout: u32,
    on_connected: Option<ServerConnectedCallback>,
    on_message: Option<ServerMessageCallback>,
    on_closed: Option<ServerConnectedCallback>,
    on_event: Option<ServerConnectedCallback>,
}

/// A multi-reactor TCP server.
pub struct TcpServer {
    port: u16,
    thread_count: usize,
    idle_timeout: u32,
    on_connected: Option<ServerConnectedCallback>,
    on_message: Option<ServerMessageCallback>,
    on_closed: Option<ServerConnectedCallback>,
    on_event: Option<ServerConnectedCallback>,
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("port", &self.port)
            .field("thread_count", &self.thread_count)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl TcpServer {
    /// Creates a server for `port` with no workers, no idle eviction and no
    /// callbacks.
    pub fn new(port: u16) -> TcpServer {
        TcpServer {
            port,
            thread_count: 0,
            idle_timeout: 0,
            on_connected: None,
            on_message: None,
            on_closed: None,
            on_event: None,
        }
    }

    /// Number of worker loops. Zero serves everything on the master loop.
    pub fn set_thread_count(&mut self, count: usize) {
        self.thread_count = count;
    }

    /// Seconds of silence before a connection is evicted; zero disables.
    pub fn set_idle_timeout(&mut self, seconds: u32) {
        self.idle_timeout = seconds;
    }

    /// Callback for each newly established connection.
    pub fn set_connected_callback(
        &mut self,
        cb: impl Fn(&Rc<Connection>) + Send + Sync + 'static,
    ) {
        self.on_connected = Some(Arc::new(cb));
    }

    /// Callback for inbound data, handed the connection's inbound buffer.
    pub fn set_message_callback(
        &mut self,
        cb: impl Fn(&Rc<Connection>, &mut Buffer) + Send + Sync + 'static,
    ) {
        self.on_message = Some(Arc::new(cb));
    }

    /// Callback for each closing connection.
    pub fn set_closed_callback(&mut self, cb: impl Fn(&Rc<Connection>) + Send + Sync + 'static) {
        self.on_closed = Some(Arc::new(cb));
    }

    /// Callback for every observable event on any connection.
    pub fn set_any_event_callback(
        &mut self,
        cb: impl Fn(&Rc<Connection>) + Send + Sync + 'static,
    ) {
        self.on_event = Some(Arc::new(cb));
    }

    /// Builds the master loop, the worker pool and the acceptor, then runs
    /// the master loop forever.
    pub fn start(self) -> ! {
        let master = EventLoop::new();
        let pool = LoopPool::new(master.handle(), self.thread_count);
        let shared = Arc::new(ServerShared {
            next_id: AtomicU64::new(1),
            index: Mutex::new(HashMap::new()),
            idle_timeout: self.idle_timeout,
            on_connected: self.on_connected,
            on_message: self.on_message,
            on_closed: self.on_closed,
            on_event: self.on_event,
        });

        let acceptor = Acceptor::new(&master, self.port);
        let accept_shared = shared.clone();
        acceptor.set_accept_callback(move |fd| {
            let id = accept_shared.next_id.fetch_add(1, Ordering::Relaxed);
            let handle = pool.next_loop();
            accept_shared
                .index
                .lock()
                .expect("server index poisoned")
                .insert(id, handle.clone());
            let shared = accept_shared.clone();
            handle.run_in_loop(move || attach_connection(shared, id, fd));
        });
        acceptor.listen();
        info!(
            "listening on port {} with {} worker loop(s)",
            self.port, self.thread_count
        );
        master.run()
    }
}

// Runs on the owning loop: builds the connection, wires the user callbacks
// and the index cleanup, stores the strong reference, arms idle eviction and
// declares the connection established.
fn attach_connection(shared: Arc<ServerShared>, id: u64, fd: RawFd) {
    let owner = EventLoop::current();
    let conn = Connection::new(&owner, id, fd);

    if let Some(cb) = &shared.on_connected {
        let cb = cb.clone();
        conn.set_connected_callback(move |c| cb(c));
    }
    if let Some(cb) = &shared.on_message {
        let cb = cb.clone();
        conn.set_message_callback(move |c, buf| cb(c, buf));
    }
    if let Some(cb) = &shared.on_closed {
        let cb = cb.clone();
        conn.set_closed_callback(move |c| cb(c));
    }
    if let Some(cb) = &shared.on_event {
        let cb = cb.clone();
        conn.set_any_event_callback(move |c| cb(c));
    }

    let index_shared = shared.clone();
    conn.set_server_closed_callback(move |c| {
        CONNECTIONS.with(|table| {
            table.borrow_mut().remove(&c.id());
        });
        index_shared
            .index
            .lock()
            .expect("server index poisoned")
            .remove(&c.id());
    });

    CONNECTIONS.with(|table| {
        table.borrow_mut().insert(id, conn.clone());
    });
    if shared.idle_timeout > 0 {
        conn.enable_inactive_release(shared.idle_timeout);
    }
    conn.established();
}
