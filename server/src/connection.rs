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

//! Per-connection lifecycle, buffers and callbacks.
//!
//! A [`Connection`] glues one accepted socket to its owning loop: a channel
//! for readiness, in/out buffers, a four-state lifecycle, idle-timeout
//! binding through the loop's timer wheel, and the user-facing callback set.
//! Every operation runs on the owning loop; events for one connection are
//! therefore strictly serialized and no two callbacks ever overlap.

use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::rc::Rc;

use log::{debug, trace};

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::socket::Socket;

const RECV_CHUNK: usize = 65536;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and wired up, read interest not yet enabled.
    Connecting,
    /// Normal operation.
    Connected,
    /// Half-closed: draining the outbound buffer before release.
    Disconnecting,
    /// Descriptor closed, channel removed, index entries purged.
    Disconnected,
}

/// Callback invoked with the connection once it is established or closed.
pub type ConnectedCallback = Rc<dyn Fn(&Rc<Connection>)>;
/// Callback invoked with the connection and its inbound buffer.
pub type MessageCallback = Rc<dyn Fn(&Rc<Connection>, &mut Buffer)>;
/// Callback invoked when the connection closes.
pub type ClosedCallback = Rc<dyn Fn(&Rc<Connection>)>;
/// Callback invoked after every observable event on the connection.
pub type AnyEventCallback = Rc<dyn Fn(&Rc<Connection>)>;

type Slot<T> = RefCell<Option<T>>;

/// One accepted TCP connection bound to its owning loop.
pub struct Connection {
    id: u64,
    socket: Socket,
    owner: Rc<EventLoop>,
    channel: Rc<Channel>,
    state: Cell<ConnState>,
    idle_release: Cell<bool>,
    in_buf: RefCell<Buffer>,
    out_buf: RefCell<Buffer>,
    context: RefCell<Box<dyn Any>>,
    connected_cb: Slot<ConnectedCallback>,
    message_cb: Slot<MessageCallback>,
    closed_cb: Slot<ClosedCallback>,
    event_cb: Slot<AnyEventCallback>,
    // Set by the server so it can purge its index entries; runs last.
    server_closed_cb: Slot<ClosedCallback>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("fd", &self.socket.fd())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps an accepted descriptor. The connection starts in `Connecting`
    /// with all channel callbacks wired but no interest registered; call
    /// [`Connection::established`] once the user callbacks are in place.
    pub fn new(owner: &Rc<EventLoop>, id: u64, fd: RawFd) -> Rc<Connection> {
        let channel = Channel::new(owner, fd);
        let conn = Rc::new(Connection {
            id,
            socket: Socket::from_fd(fd),
            owner: owner.clone(),
            channel,
            state: Cell::new(ConnState::Connecting),
            idle_release: Cell::new(false),
            in_buf: RefCell::new(Buffer::new()),
            out_buf: RefCell::new(Buffer::new()),
            context: RefCell::new(Box::new(())),
            connected_cb: RefCell::new(None),
            message_cb: RefCell::new(None),
            closed_cb: RefCell::new(None),
            event_cb: RefCell::new(None),
            server_closed_cb: RefCell::new(None),
        });

        // Each channel callback takes its own strong reference for the
        // duration of the dispatch, so user code calling `release` mid-event
        // cannot destroy the connection out from under it.
        let weak = Rc::downgrade(&conn);
        conn.channel.set_read_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_read();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_write_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_write();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_error_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_error();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_close_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_close();
            }
        });
        let weak = Rc::downgrade(&conn);
        conn.channel.set_event_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_any_event();
            }
        });
        conn
    }

    /// The server-assigned, monotonically increasing id. Doubles as the
    /// connection's timer key.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying descriptor, -1 once released.
    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    /// Whether the connection is in normal operation.
    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnState::Connected
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// The untyped per-connection payload. Protocol layers store their
    /// parsing context here; `upgrade` swaps it wholesale.
    pub fn context(&self) -> RefMut<'_, Box<dyn Any>> {
        self.context.borrow_mut()
    }

    /// Replaces the per-connection payload.
    pub fn set_context(&self, context: Box<dyn Any>) {
        *self.context.borrow_mut() = context;
    }

    /// Sets the on-connect callback.
    pub fn set_connected_callback(&self, cb: impl Fn(&Rc<Connection>) + 'static) {
        *self.connected_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the message callback, invoked with the inbound buffer whenever
    /// data arrives.
    pub fn set_message_callback(&self, cb: impl Fn(&Rc<Connection>, &mut Buffer) + 'static) {
        *self.message_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the close callback.
    pub fn set_closed_callback(&self, cb: impl Fn(&Rc<Connection>) + 'static) {
        *self.closed_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the any-event callback, invoked after every observable event.
    pub fn set_any_event_callback(&self, cb: impl Fn(&Rc<Connection>) + 'static) {
        *self.event_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the server-internal close callback that purges index entries.
    /// Runs after the user close callback.
    pub fn set_server_closed_callback(&self, cb: impl Fn(&Rc<Connection>) + 'static) {
        *self.server_closed_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Completes setup: `Connecting` becomes `Connected`, read interest goes
    /// live and the on-connect callback runs.
    pub fn established(self: &Rc<Self>) {
        self.owner.assert_in_loop();
        debug_assert_eq!(ConnState::Connecting, self.state.get());
        self.state.set(ConnState::Connected);
        self.channel.enable_read();
        if let Some(cb) = self.connected_cb.borrow().clone() {
            cb(self);
        }
    }

    /// Appends `data` to the outbound buffer and arms write interest. A
    /// released connection swallows the data.
    pub fn send(self: &Rc<Self>, data: &[u8]) {
        self.owner.assert_in_loop();
        if self.state.get() == ConnState::Disconnected {
            return;
        }
        self.out_buf.borrow_mut().push(data);
        if !self.channel.writing() {
            self.channel.enable_write();
        }
    }

    /// Begins the half-close sequence: leftover inbound data gets one last
    /// message delivery, then the outbound buffer drains before the
    /// connection is released. With nothing left to send the release happens
    /// immediately.
    pub fn shutdown(self: &Rc<Self>) {
        self.owner.assert_in_loop();
        if self.state.get() == ConnState::Disconnected {
            return;
        }
        self.state.set(ConnState::Disconnecting);
        self.deliver_message();
        if !self.out_buf.borrow().is_empty() {
            if !self.channel.writing() {
                self.channel.enable_write();
            }
        } else {
            self.release();
        }
    }

    /// Queues the actual teardown so it runs after the current dispatch
    /// pass, when no callback frame still borrows the connection.
    pub fn release(self: &Rc<Self>) {
        self.owner.assert_in_loop();
        let conn = self.clone();
        self.owner.queue_in_loop(move || conn.release_in_loop());
    }

    /// Arms (or re-stamps) the idle-eviction timer: after `seconds` with no
    /// observable event the connection is released.
    pub fn enable_inactive_release(self: &Rc<Self>, seconds: u32) {
        self.owner.assert_in_loop();
        self.idle_release.set(true);
        if self.owner.has_timer(self.id) {
            self.owner.timer_refresh(self.id);
            return;
        }
        let weak = Rc::downgrade(self);
        self.owner.timer_add(self.id, seconds, move || {
            if let Some(conn) = weak.upgrade() {
                trace!("connection {} idle, evicting", conn.id);
                conn.release();
            }
        });
    }

    /// Disarms idle eviction.
    pub fn cancel_inactive_release(self: &Rc<Self>) {
        self.owner.assert_in_loop();
        self.idle_release.set(false);
        if self.owner.has_timer(self.id) {
            self.owner.timer_cancel(self.id);
        }
    }

    /// Atomically switches the connection to a new protocol: context and the
    /// connect/message/close/any-event callbacks are replaced in one step on
    /// the owning loop, so no message is ever dispatched through the old set
    /// after the swap.
    pub fn upgrade(
        self: &Rc<Self>,
        context: Box<dyn Any>,
        connected: ConnectedCallback,
        message: MessageCallback,
        closed: ClosedCallback,
        event: AnyEventCallback,
    ) {
        self.owner.assert_in_loop();
        *self.context.borrow_mut() = context;
        *self.connected_cb.borrow_mut() = Some(connected);
        *self.message_cb.borrow_mut() = Some(message);
        *self.closed_cb.borrow_mut() = Some(closed);
        *self.event_cb.borrow_mut() = Some(event);
    }

    // Runs the message callback against the inbound buffer if it holds data.
    // The buffer borrow is speculative: when the callback itself triggers a
    // shutdown we can arrive here re-entrantly while the outer delivery still
    // holds the buffer, and the inner attempt must simply back off.
    fn deliver_message(self: &Rc<Self>) {
        let cb = self.message_cb.borrow().clone();
        let Some(cb) = cb else { return };
        let Ok(mut in_buf) = self.in_buf.try_borrow_mut() else {
            return;
        };
        if in_buf.is_empty() {
            return;
        }
        cb(self, &mut in_buf);
    }

    fn handle_read(self: &Rc<Self>) {
        let mut chunk = [0u8; RECV_CHUNK];
        match self.socket.recv(&mut chunk) {
            // Peer finished writing; drain what we have and half-close.
            Ok(0) => self.shutdown(),
            Ok(n) => {
                self.in_buf.borrow_mut().push(&chunk[..n]);
                self.deliver_message();
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                debug!("connection {} recv failed: {e}", self.id);
                self.shutdown();
            }
        }
    }

    fn handle_write(self: &Rc<Self>) {
        let result = {
            let out_buf = self.out_buf.borrow();
            self.socket.send(out_buf.readable())
        };
        match result {
            Ok(n) => {
                let emptied = {
                    let mut out_buf = self.out_buf.borrow_mut();
                    out_buf.consume(n);
                    out_buf.is_empty()
                };
                if emptied {
                    self.channel.disable_write();
                    if self.state.get() == ConnState::Disconnecting {
                        self.release();
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                // The write half is gone for good; give unprocessed inbound
                // data a last delivery, then tear down.
                debug!("connection {} send failed: {e}", self.id);
                self.deliver_message();
                self.release();
            }
        }
    }

    fn handle_close(self: &Rc<Self>) {
        self.deliver_message();
        self.release();
    }

    fn handle_error(self: &Rc<Self>) {
        self.handle_close();
    }

    // The any-event hook: every observable event re-stamps the idle timer.
    fn handle_any_event(self: &Rc<Self>) {
        if self.idle_release.get() {
            self.owner.timer_refresh(self.id);
        }
        if let Some(cb) = self.event_cb.borrow().clone() {
            cb(self);
        }
    }

    // The terminal transition. Must be the last thing run on this
    // connection: the close callbacks drop the server-held strong
    // references, after which only in-flight frames keep it alive.
    fn release_in_loop(self: &Rc<Self>) {
        if self.state.get() == ConnState::Disconnected {
            return;
        }
        self.state.set(ConnState::Disconnected);
        self.channel.remove();
        self.socket.close();
        if self.owner.has_timer(self.id) {
            self.cancel_inactive_release();
        }
        if let Some(cb) = self.closed_cb.borrow().clone() {
            cb(self);
        }
        if let Some(cb) = self.server_closed_cb.borrow().clone() {
            cb(self);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("connection {} destroyed", self.id);
    }
}
