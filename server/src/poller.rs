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

//! Readiness multiplexer keyed by descriptor.
//!
//! Wraps a level-triggered epoll instance: a descriptor keeps getting
//! reported while its condition holds, so handlers may consume as little as
//! one readiness event's worth of data per wakeup without losing any.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use log::warn;

use crate::channel::Channel;

const MAX_POLL_EVENTS: usize = 1024;

/// Registered channels plus the epoll instance monitoring them.
pub struct Poller {
    ep: OwnedFd,
    channels: RefCell<HashMap<RawFd, Rc<Channel>>>,
    events: RefCell<Vec<libc::epoll_event>>,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("ep", &self.ep)
            .field("registered", &self.channels.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates the epoll instance. Failure to obtain one is process-fatal.
    pub fn new() -> Poller {
        let ep = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))
            .expect("failed to create epoll instance");
        // SAFETY: `epoll_create1(2)` returned a valid descriptor.
        let ep = unsafe { OwnedFd::from_raw_fd(ep) };
        Poller {
            ep,
            channels: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::with_capacity(MAX_POLL_EVENTS)),
        }
    }

    /// Adds a new registration or modifies an existing one to match the
    /// channel's current event mask.
    pub fn update(&self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        let op = if self.channels.borrow().contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            self.channels.borrow_mut().insert(fd, channel.clone());
            libc::EPOLL_CTL_ADD
        };
        let mut event = libc::epoll_event {
            events: channel.events(),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), op, fd, &mut event))
            .unwrap_or_else(|e| panic!("epoll_ctl failed for fd {fd}: {e}"));
    }

    /// Detaches a channel. The descriptor must still be open.
    pub fn remove(&self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        if self.channels.borrow_mut().remove(&fd).is_none() {
            return;
        }
        if let Err(e) = syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut(),
        )) {
            warn!("epoll_ctl(DEL) failed for fd {fd}: {e}");
        }
    }

    /// Blocks until at least one descriptor is ready or `timeout_ms` elapses
    /// (-1 blocks indefinitely). Each ready channel gets its delivered mask
    /// stamped and is appended to `active`. A signal interrupt returns with
    /// no channels; the caller simply polls again.
    pub fn poll(&self, timeout_ms: i32, active: &mut Vec<Rc<Channel>>) {
        let mut events = self.events.borrow_mut();
        events.clear();
        let n = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            MAX_POLL_EVENTS as libc::c_int,
            timeout_ms,
        )) {
            Ok(n) => n as usize,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return,
            Err(e) => panic!("epoll_wait failed: {e}"),
        };
        // SAFETY: `epoll_wait` initialized exactly `n` entries.
        unsafe { events.set_len(n) };

        let channels = self.channels.borrow();
        for i in 0..n {
            let event: libc::epoll_event = events[i];
            if let Some(channel) = channels.get(&(event.u64 as RawFd)) {
                channel.set_revents(event.events);
                active.push(channel.clone());
            }
        }
    }
}
