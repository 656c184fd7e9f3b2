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

//! Hashed timer wheel with O(1) add, refresh and cancel.
//!
//! Buckets hold strong references to tasks; an id index holds weak ones. A
//! task's user callback runs when the last strong reference drops, so
//! refreshing is just cloning the strong ref into a later bucket; the copy
//! left behind expires harmlessly when its bucket is cleared. Every operation
//! must run on the wheel's owning loop thread; foreign threads post through
//! the loop's handle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Number of one-second slots. Delays span `1..=WHEEL_CAPACITY`.
pub const WHEEL_CAPACITY: usize = 60;

type TaskIndex = RefCell<HashMap<u64, Weak<TimerTask>>>;

/// A scheduled action identified by its owner's id. The action fires at drop
/// time unless cancelled; the index entry is removed at drop time always.
pub struct TimerTask {
    id: u64,
    delay: u32,
    cancelled: Cell<bool>,
    task: RefCell<Option<Box<dyn FnOnce()>>>,
    index: Weak<TaskIndex>,
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTask")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("cancelled", &self.cancelled.get())
            .finish_non_exhaustive()
    }
}

impl TimerTask {
    /// Suppresses the user callback; the index cleanup still happens.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// The delay the task was scheduled with, in seconds.
    pub fn delay(&self) -> u32 {
        self.delay
    }
}

impl Drop for TimerTask {
    fn drop(&mut self) {
        if !self.cancelled.get() {
            if let Some(task) = self.task.borrow_mut().take() {
                task();
            }
        }
        if let Some(index) = self.index.upgrade() {
            index.borrow_mut().remove(&self.id);
        }
    }
}

/// Fixed-size ring of task buckets plus an id index for refresh/cancel.
pub struct TimerWheel {
    tick: Cell<usize>,
    buckets: RefCell<Vec<Vec<Rc<TimerTask>>>>,
    index: Rc<TaskIndex>,
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("tick", &self.tick.get())
            .field("pending", &self.index.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerWheel {
    /// Creates an empty wheel with the cursor at slot 0.
    pub fn new() -> TimerWheel {
        TimerWheel {
            tick: Cell::new(0),
            buckets: RefCell::new(vec![Vec::new(); WHEEL_CAPACITY]),
            index: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Schedules `task` to fire `delay` seconds from now, keyed by `id`.
    pub fn add(&self, id: u64, delay: u32, task: Box<dyn FnOnce()>) {
        debug_assert!(
            delay >= 1 && delay as usize <= WHEEL_CAPACITY,
            "timer delay out of range"
        );
        let task = Rc::new(TimerTask {
            id,
            delay,
            cancelled: Cell::new(false),
            task: RefCell::new(Some(task)),
            index: Rc::downgrade(&self.index),
        });
        let pos = (self.tick.get() + delay as usize) % WHEEL_CAPACITY;
        self.index.borrow_mut().insert(id, Rc::downgrade(&task));
        self.buckets.borrow_mut()[pos].push(task);
    }

    /// Pushes `id`'s expiry `delay` seconds into the future by inserting a
    /// fresh strong reference; the old one expires without effect. Unknown
    /// ids are ignored.
    pub fn refresh(&self, id: u64) {
        let task = self.index.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(task) = task {
            let pos = (self.tick.get() + task.delay() as usize) % WHEEL_CAPACITY;
            self.buckets.borrow_mut()[pos].push(task);
        }
    }

    /// Marks `id`'s task cancelled so its callback never runs. Unknown ids
    /// are ignored.
    pub fn cancel(&self, id: u64) {
        let task = self.index.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(task) = task {
            task.cancel();
        }
    }

    /// Whether a task keyed by `id` is still pending.
    pub fn has(&self, id: u64) -> bool {
        self.index.borrow().contains_key(&id)
    }

    /// Steps the cursor one slot and releases everything in the slot it
    /// lands on. Task destructors run after all internal borrows are dropped,
    /// so they are free to add, refresh or cancel other timers.
    pub fn advance(&self) {
        let next = (self.tick.get() + 1) % WHEEL_CAPACITY;
        self.tick.set(next);
        let expired = std::mem::take(&mut self.buckets.borrow_mut()[next]);
        drop(expired);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flag_task(flag: &Rc<Cell<bool>>) -> Box<dyn FnOnce()> {
        let flag = flag.clone();
        Box::new(move || flag.set(true))
    }

    #[test]
    fn fires_after_its_delay() {
        let wheel = TimerWheel::new();
        let fired = Rc::new(Cell::new(false));
        wheel.add(1, 3, flag_task(&fired));

        wheel.advance();
        wheel.advance();
        assert!(!fired.get());
        wheel.advance();
        assert!(fired.get());
        assert!(!wheel.has(1));
    }

    #[test]
    fn refresh_postpones_firing() {
        let wheel = TimerWheel::new();
        let fired = Rc::new(Cell::new(false));
        wheel.add(888, 3, flag_task(&fired));

        // Each refresh happens at tick t and re-stamps the expiry to t + 3,
        // so the last refresh (at tick 2) arms slot 5.
        for _ in 0..3 {
            wheel.refresh(888);
            wheel.advance();
            assert!(!fired.get());
        }
        wheel.advance();
        assert!(!fired.get());
        wheel.advance();
        assert!(fired.get());
    }

    #[test]
    fn cancelled_task_never_runs_but_is_released() {
        let wheel = TimerWheel::new();
        let fired = Rc::new(Cell::new(false));
        wheel.add(7, 2, flag_task(&fired));
        wheel.cancel(7);

        wheel.advance();
        wheel.advance();
        assert!(!fired.get());
        assert!(!wheel.has(7));
    }

    #[test]
    fn full_capacity_delay_wraps_once_around() {
        let wheel = TimerWheel::new();
        let fired = Rc::new(Cell::new(false));
        wheel.add(5, WHEEL_CAPACITY as u32, flag_task(&fired));

        for _ in 0..WHEEL_CAPACITY - 1 {
            wheel.advance();
        }
        assert!(!fired.get());
        wheel.advance();
        assert!(fired.get());
    }

    #[test]
    fn task_may_reschedule_from_its_own_callback() {
        let wheel = Rc::new(TimerWheel::new());
        let fired = Rc::new(Cell::new(false));
        let w = wheel.clone();
        let f = fired.clone();
        wheel.add(
            9,
            1,
            Box::new(move || {
                w.add(10, 1, flag_task(&f));
            }),
        );

        wheel.advance();
        assert!(wheel.has(10));
        wheel.advance();
        assert!(fired.get());
    }
}
