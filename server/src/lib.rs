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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! vev is a multi-reactor TCP server framework: one event loop per thread,
//! level-triggered readiness dispatch, a hashed timer wheel for
//! idle-connection eviction, and a per-connection state machine with
//! grow/compact byte buffers.
//!
//! A listening socket lives on a master loop; accepted connections are handed
//! round-robin to worker loops and never migrate afterwards. All callbacks for
//! one connection run serialized on its owning loop.
//!
//! ## Examples
//!
//! Examples can be found in the `examples` directory of the source code.

// Converts a -1 libc return into `io::Error::last_os_error()`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod acceptor;
pub mod buffer;
pub mod channel;
pub mod connection;
pub mod event_loop;
pub mod pool;
pub mod poller;
pub mod server;
pub mod socket;
pub mod timer;

pub use buffer::Buffer;
pub use connection::Connection;
pub use event_loop::{EventLoop, LoopHandle};
pub use server::TcpServer;
