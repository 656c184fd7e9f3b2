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

//! HTTP/1.0 and HTTP/1.1 on top of the vev reactor.
//!
//! The parser is a resumable state machine that decodes the request line,
//! headers and body across however many readiness events they arrive in.
//! [`HttpServer`] adds regex route tables per method, a static-file handler
//! rooted at a base directory, and keep-alive response assembly.

pub mod context;
pub mod request;
pub mod response;
pub mod server;
pub mod status;
pub mod util;

pub use context::{HttpContext, RecvState};
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use server::HttpServer;
