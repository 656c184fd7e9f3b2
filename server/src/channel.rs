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

//! Per-descriptor event registration and dispatch.
//!
//! A `Channel` binds a descriptor's requested event mask to typed callbacks.
//! Every mask mutation syncs to the owning loop's poller; `handle_event`
//! translates the delivered mask into callback invocations.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use crate::event_loop::EventLoop;

/// Read-family bits: plain readable, priority data, and peer half-close. The
/// half-close bit is included so the last bytes from a closing peer are
/// drained through the read path before the connection is torn down.
pub const READ_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLPRI | libc::EPOLLRDHUP) as u32;
/// Writable bit.
pub const WRITE_EVENTS: u32 = libc::EPOLLOUT as u32;

type CallbackSlot = RefCell<Option<Rc<dyn Fn()>>>;

/// A descriptor's event mask plus its read/write/error/close callbacks and
/// an any-event hook that runs after every dispatch.
///
/// The channel does not own the descriptor; it must be removed from its loop
/// before the descriptor closes.
pub struct Channel {
    fd: RawFd,
    owner: Weak<EventLoop>,
    events: Cell<u32>,
    revents: Cell<u32>,
    read_cb: CallbackSlot,
    write_cb: CallbackSlot,
    error_cb: CallbackSlot,
    close_cb: CallbackSlot,
    event_cb: CallbackSlot,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("fd", &self.fd)
            .field("events", &self.events.get())
            .field("revents", &self.revents.get())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Creates a channel for `fd` on `owner`. No interest is registered until
    /// one of the enable calls runs.
    pub fn new(owner: &Rc<EventLoop>, fd: RawFd) -> Rc<Channel> {
        Rc::new(Channel {
            fd,
            owner: Rc::downgrade(owner),
            events: Cell::new(0),
            revents: Cell::new(0),
            read_cb: RefCell::new(None),
            write_cb: RefCell::new(None),
            error_cb: RefCell::new(None),
            close_cb: RefCell::new(None),
            event_cb: RefCell::new(None),
        })
    }

    /// The monitored descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The currently requested event mask.
    pub fn events(&self) -> u32 {
        self.events.get()
    }

    /// Stamps the mask delivered by the poller for the next dispatch.
    pub fn set_revents(&self, revents: u32) {
        self.revents.set(revents);
    }

    /// Sets the readable-event callback.
    pub fn set_read_callback(&self, cb: impl Fn() + 'static) {
        *self.read_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the writable-event callback.
    pub fn set_write_callback(&self, cb: impl Fn() + 'static) {
        *self.write_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the error-event callback.
    pub fn set_error_callback(&self, cb: impl Fn() + 'static) {
        *self.error_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the hang-up callback.
    pub fn set_close_callback(&self, cb: impl Fn() + 'static) {
        *self.close_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Sets the any-event hook, invoked last on every dispatch.
    pub fn set_event_callback(&self, cb: impl Fn() + 'static) {
        *self.event_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Whether read interest is currently requested.
    pub fn reading(&self) -> bool {
        self.events.get() & libc::EPOLLIN as u32 != 0
    }

    /// Whether write interest is currently requested.
    pub fn writing(&self) -> bool {
        self.events.get() & WRITE_EVENTS != 0
    }

    /// Requests the read family (readable, priority, peer half-close).
    pub fn enable_read(self: &Rc<Self>) {
        self.events.set(self.events.get() | READ_EVENTS);
        self.update();
    }

    /// Requests writable events.
    pub fn enable_write(self: &Rc<Self>) {
        self.events.set(self.events.get() | WRITE_EVENTS);
        self.update();
    }

    /// Drops plain read interest.
    pub fn disable_read(self: &Rc<Self>) {
        self.events.set(self.events.get() & !(libc::EPOLLIN as u32));
        self.update();
    }

    /// Drops write interest.
    pub fn disable_write(self: &Rc<Self>) {
        self.events.set(self.events.get() & !WRITE_EVENTS);
        self.update();
    }

    /// Drops all interest while staying registered.
    pub fn disable_all(self: &Rc<Self>) {
        self.events.set(0);
        self.update();
    }

    /// Detaches the channel from its loop's poller. Must happen before the
    /// descriptor is closed.
    pub fn remove(self: &Rc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_channel(self);
        }
    }

    fn update(self: &Rc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.update_channel(self);
        }
    }

    /// Dispatches the delivered event mask: read family first, then writable,
    /// then (mutually exclusive with writable) error or hang-up, and the
    /// any-event hook last regardless of what fired. Reads run before close so
    /// a half-closed peer's final bytes are not lost; writes run before error
    /// so pending output gets a last attempt on a faulting socket.
    pub fn handle_event(&self) {
        let revents = self.revents.get();
        if revents & READ_EVENTS != 0 {
            Self::invoke(&self.read_cb);
        }
        if revents & WRITE_EVENTS != 0 {
            Self::invoke(&self.write_cb);
        } else if revents & libc::EPOLLERR as u32 != 0 {
            Self::invoke(&self.error_cb);
        } else if revents & libc::EPOLLHUP as u32 != 0 {
            Self::invoke(&self.close_cb);
        }
        Self::invoke(&self.event_cb);
    }

    // Clones the callback out of its slot before the call so a callback that
    // replaces the slot (protocol upgrade) never aliases a live borrow.
    fn invoke(slot: &CallbackSlot) {
        let cb = slot.borrow().clone();
        if let Some(cb) = cb {
            cb();
        }
    }
}
