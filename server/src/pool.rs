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

//! Reactor threads and the worker pool.
//!
//! A [`LoopThread`] spawns a thread, builds an [`EventLoop`] inside it (a
//! loop must be constructed on the thread that will run it), and hands the
//! loop's handle back to the spawner. A [`LoopPool`] owns a set of those
//! workers and deals connections out round-robin.

use std::cell::Cell;
use std::sync::mpsc;
use std::thread;

use crate::event_loop::{EventLoop, LoopHandle};

/// A reactor running on its own named thread until process exit.
#[derive(Debug)]
pub struct LoopThread {
    handle: LoopHandle,
}

impl LoopThread {
    /// Spawns the thread and blocks until its loop is up and pollable.
    pub fn new(name: String) -> LoopThread {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let event_loop = EventLoop::new();
                tx.send(event_loop.handle())
                    .expect("loop thread spawner went away");
                event_loop.run();
            })
            .expect("failed to spawn loop thread");
        let handle = rx.recv().expect("loop thread died during startup");
        LoopThread { handle }
    }

    /// The running loop's handle.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }
}

/// The master loop's handle plus `n` worker loops.
#[derive(Debug)]
pub struct LoopPool {
    master: LoopHandle,
    workers: Vec<LoopThread>,
    next: Cell<usize>,
}

impl LoopPool {
    /// Spawns `count` worker loops. With a count of zero every connection is
    /// served by the master loop itself.
    pub fn new(master: LoopHandle, count: usize) -> LoopPool {
        let workers = (0..count)
            .map(|i| LoopThread::new(format!("vev-loop-{i}")))
            .collect();
        LoopPool {
            master,
            workers,
            next: Cell::new(0),
        }
    }

    /// The handle the next connection should be assigned to.
    pub fn next_loop(&self) -> LoopHandle {
        if self.workers.is_empty() {
            return self.master.clone();
        }
        let i = self.next.get();
        self.next.set((i + 1) % self.workers.len());
        self.workers[i].handle()
    }
}
