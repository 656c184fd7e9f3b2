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

//! Thread-owned reactor loop.
//!
//! An [`EventLoop`] is bound permanently to the thread that creates it. Each
//! cycle polls for readiness, dispatches every active channel, then drains
//! the task queues. Foreign threads reach the loop through its [`LoopHandle`]:
//! tasks are enqueued under a mutex and the loop is woken through an eventfd
//! registered like any other channel. A kernel timer file ticks once per
//! second and drives the loop's timer wheel.

use std::cell::RefCell;
use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::error;

use crate::channel::Channel;
use crate::poller::Poller;
use crate::timer::TimerWheel;

thread_local! {
    static CURRENT: RefCell<Option<Rc<EventLoop>>> = RefCell::new(None);
}

type LocalTask = Box<dyn FnOnce()>;
type ForeignTask = Box<dyn FnOnce() + Send>;

// State reachable from other threads: the wake descriptor and the queue.
struct LoopShared {
    thread: ThreadId,
    event_fd: OwnedFd,
    tasks: Mutex<Vec<ForeignTask>>,
}

/// A cheap, cloneable, `Send` handle to an [`EventLoop`] on another thread.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.shared.thread)
            .finish_non_exhaustive()
    }
}

impl LoopHandle {
    /// Whether the calling thread is the loop's own thread.
    pub fn is_in_loop(&self) -> bool {
        thread::current().id() == self.shared.thread
    }

    /// Runs `task` synchronously when already on the loop thread, otherwise
    /// enqueues it and wakes the loop. Queued tasks run after the current
    /// dispatch pass, in submission order.
    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Always enqueues `task` for the next drain, even from the loop thread.
    pub fn queue_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        self.shared
            .tasks
            .lock()
            .expect("loop task queue poisoned")
            .push(Box::new(task));
        self.shared.wakeup();
    }
}

impl LoopShared {
    // Bumps the eventfd counter so a blocked poll returns. A full counter
    // only means the loop is already far behind on wakeups, so short writes
    // are ignored.
    fn wakeup(&self) {
        let buf = 1u64.to_ne_bytes();
        let ret = unsafe {
            libc::write(
                self.event_fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                error!("eventfd write failed: {err}");
            }
        }
    }
}

/// A single-thread reactor: poller, wake eventfd, timer wheel behind a
/// 1-second timerfd, and a cross-thread task queue.
pub struct EventLoop {
    shared: Arc<LoopShared>,
    poller: Poller,
    wheel: TimerWheel,
    timer_fd: OwnedFd,
    local_tasks: RefCell<Vec<LocalTask>>,
    // Keep the wake/timer channels registered for the loop's lifetime.
    event_channel: RefCell<Option<Rc<Channel>>>,
    timer_channel: RefCell<Option<Rc<Channel>>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread", &self.shared.thread)
            .field("poller", &self.poller)
            .field("wheel", &self.wheel)
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    /// Creates the loop owned by the calling thread and registers it as the
    /// thread's current loop. Panics if the thread already owns one, or if
    /// any of the kernel facilities (epoll, eventfd, timerfd) cannot be
    /// created.
    pub fn new() -> Rc<EventLoop> {
        let event_fd = create_event_fd();
        let timer_fd = create_timer_fd();
        let event_loop = Rc::new(EventLoop {
            shared: Arc::new(LoopShared {
                thread: thread::current().id(),
                event_fd,
                tasks: Mutex::new(Vec::new()),
            }),
            poller: Poller::new(),
            wheel: TimerWheel::new(),
            timer_fd,
            local_tasks: RefCell::new(Vec::new()),
            event_channel: RefCell::new(None),
            timer_channel: RefCell::new(None),
        });

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            assert!(
                current.is_none(),
                "thread already owns an event loop"
            );
            *current = Some(event_loop.clone());
        });

        let event_channel = Channel::new(&event_loop, event_loop.shared.event_fd.as_raw_fd());
        let weak = Rc::downgrade(&event_loop);
        event_channel.set_read_callback(move || {
            if let Some(event_loop) = weak.upgrade() {
                event_loop.drain_event_fd();
            }
        });
        event_channel.enable_read();
        *event_loop.event_channel.borrow_mut() = Some(event_channel);

        let timer_channel = Channel::new(&event_loop, event_loop.timer_fd.as_raw_fd());
        let weak = Rc::downgrade(&event_loop);
        timer_channel.set_read_callback(move || {
            if let Some(event_loop) = weak.upgrade() {
                event_loop.on_timer_tick();
            }
        });
        timer_channel.enable_read();
        *event_loop.timer_channel.borrow_mut() = Some(timer_channel);

        event_loop
    }

    /// The loop registered on the calling thread. Panics when called from a
    /// thread without one.
    pub fn current() -> Rc<EventLoop> {
        CURRENT
            .with(|current| current.borrow().clone())
            .expect("no event loop on this thread")
    }

    /// A `Send` handle for reaching this loop from other threads.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether the calling thread is this loop's thread.
    pub fn is_in_loop(&self) -> bool {
        thread::current().id() == self.shared.thread
    }

    /// Panics unless called on the loop thread.
    pub fn assert_in_loop(&self) {
        assert!(self.is_in_loop(), "called off the owning loop thread");
    }

    /// Runs forever: poll, dispatch every active channel, drain tasks.
    pub fn run(self: &Rc<Self>) -> ! {
        self.assert_in_loop();
        let mut active = Vec::new();
        loop {
            active.clear();
            self.poller.poll(-1, &mut active);
            for channel in &active {
                channel.handle_event();
            }
            self.run_pending_tasks();
        }
    }

    /// Defers `task` to the end of the current (or next) cycle on this loop's
    /// thread. Unlike [`LoopHandle::queue_in_loop`] the task may borrow
    /// thread-local state, so this is the loop-internal way to delay work
    /// until the dispatch pass finishes.
    pub fn queue_in_loop(&self, task: impl FnOnce() + 'static) {
        self.assert_in_loop();
        self.local_tasks.borrow_mut().push(Box::new(task));
        self.shared.wakeup();
    }

    pub(crate) fn update_channel(&self, channel: &Rc<Channel>) {
        self.poller.update(channel);
    }

    pub(crate) fn remove_channel(&self, channel: &Rc<Channel>) {
        self.poller.remove(channel);
    }

    /// Schedules `task` to fire `delay` seconds from now, keyed by `id`.
    /// Loop-thread only; foreign threads post through the handle.
    pub fn timer_add(&self, id: u64, delay: u32, task: impl FnOnce() + 'static) {
        self.assert_in_loop();
        self.wheel.add(id, delay, Box::new(task));
    }

    /// Re-stamps `id`'s expiry to its full delay from now.
    pub fn timer_refresh(&self, id: u64) {
        self.assert_in_loop();
        self.wheel.refresh(id);
    }

    /// Suppresses `id`'s timer action.
    pub fn timer_cancel(&self, id: u64) {
        self.assert_in_loop();
        self.wheel.cancel(id);
    }

    /// Whether a timer keyed by `id` is pending.
    pub fn has_timer(&self, id: u64) -> bool {
        self.assert_in_loop();
        self.wheel.has(id)
    }

    // Swap-and-run: the mutex is held only for the queue swap, never across
    // a task.
    fn run_pending_tasks(&self) {
        let foreign = {
            let mut queue = self.shared.tasks.lock().expect("loop task queue poisoned");
            std::mem::take(&mut *queue)
        };
        for task in foreign {
            task();
        }
        let local = self.local_tasks.take();
        for task in local {
            task();
        }
    }

    // The eventfd is a counter; one read acknowledges every wakeup so far.
    fn drain_event_fd(&self) {
        read_counter(self.shared.event_fd.as_raw_fd());
    }

    // The timerfd counts expirations since the last read. Dispatch delays can
    // make it exceed one; the wheel advances once per missed second.
    fn on_timer_tick(&self) {
        let expirations = read_counter(self.timer_fd.as_raw_fd());
        for _ in 0..expirations {
            self.wheel.advance();
        }
    }
}

fn read_counter(fd: RawFd) -> u64 {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n == 8 {
        u64::from_ne_bytes(buf)
    } else {
        0
    }
}

fn create_event_fd() -> OwnedFd {
    let fd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))
        .expect("failed to create eventfd");
    // SAFETY: `eventfd(2)` returned a valid descriptor.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

// A periodic 1-second timer; the first expiration is also one second out.
fn create_timer_fd() -> OwnedFd {
    let fd = syscall!(timerfd_create(
        libc::CLOCK_MONOTONIC,
        libc::TFD_CLOEXEC | libc::TFD_NONBLOCK
    ))
    .expect("failed to create timerfd");
    let new_value = libc::itimerspec {
        it_interval: libc::timespec {
            tv_sec: 1,
            tv_nsec: 0,
        },
        it_value: libc::timespec {
            tv_sec: 1,
            tv_nsec: 0,
        },
    };
    syscall!(timerfd_settime(fd, 0, &new_value, std::ptr::null_mut()))
        .expect("failed to arm timerfd");
    // SAFETY: `timerfd_create(2)` returned a valid descriptor.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn spawn_loop() -> LoopHandle {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let event_loop = EventLoop::new();
            tx.send(event_loop.handle()).unwrap();
            event_loop.run();
        });
        rx.recv().unwrap()
    }

    #[test]
    fn foreign_tasks_run_in_submission_order() {
        let handle = spawn_loop();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let log = log.clone();
            handle.queue_in_loop(move || log.lock().unwrap().push(i));
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!((0..16).collect::<Vec<_>>(), *log.lock().unwrap());
    }

    #[test]
    fn run_in_loop_reaches_the_owning_thread() {
        let handle = spawn_loop();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let h = handle.clone();
        handle.run_in_loop(move || {
            flag.store(h.is_in_loop(), Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(300));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn timerfd_drives_the_wheel() {
        let handle = spawn_loop();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        handle.run_in_loop(move || {
            let flag = flag.clone();
            EventLoop::current().timer_add(42, 1, move || {
                flag.store(true, Ordering::SeqCst);
            });
        });
        thread::sleep(Duration::from_millis(400));
        assert!(!fired.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(2200));
        assert!(fired.load(Ordering::SeqCst));
    }
}
