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

//! Listening socket management.
//!
//! The acceptor owns the listening socket and a channel on the master loop;
//! its read events turn into accepted client descriptors handed to the
//! accept callback.

use std::cell::RefCell;
use std::fmt;
use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::rc::Rc;

use log::warn;

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::socket::Socket;

/// A listening socket whose read events produce accepted client fds.
pub struct Acceptor {
    socket: Socket,
    channel: Rc<Channel>,
    accept_cb: RefCell<Option<Box<dyn Fn(RawFd)>>>,
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl Acceptor {
    /// Binds and listens on `port`, wiring the read callback on `owner`.
    /// Read interest stays off until [`Acceptor::listen`]; enabling it before
    /// the accept callback exists would leak early connections.
    pub fn new(owner: &Rc<EventLoop>, port: u16) -> Rc<Acceptor> {
        let socket = Socket::create_server(port)
            .unwrap_or_else(|e| panic!("failed to listen on port {port}: {e}"));
        let channel = Channel::new(owner, socket.fd());
        let acceptor = Rc::new(Acceptor {
            socket,
            channel,
            accept_cb: RefCell::new(None),
        });
        let weak = Rc::downgrade(&acceptor);
        acceptor.channel.set_read_callback(move || {
            if let Some(acceptor) = weak.upgrade() {
                acceptor.handle_read();
            }
        });
        acceptor
    }

    /// Sets the callback that takes ownership of each accepted descriptor.
    pub fn set_accept_callback(&self, cb: impl Fn(RawFd) + 'static) {
        *self.accept_cb.borrow_mut() = Some(Box::new(cb));
    }

    /// Starts accepting by enabling read interest on the listener.
    pub fn listen(&self) {
        self.channel.enable_read();
    }

    fn handle_read(&self) {
        loop {
            match self.socket.accept() {
                Ok(fd) => {
                    if let Some(cb) = &*self.accept_cb.borrow() {
                        cb(fd);
                    } else {
                        // No handler to own the fd; don't leak it.
                        unsafe {
                            libc::close(fd);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }
}
