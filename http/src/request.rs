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

//! The parsed request model.

use std::collections::HashMap;

/// A decoded HTTP request: line, headers, query params and body, plus the
/// capture slot filled in when a regex route matches the path.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Percent-decoded path.
    pub path: String,
    /// Protocol version, `HTTP/1.0` or `HTTP/1.1`.
    pub version: String,
    /// Request body bytes.
    pub body: Vec<u8>,
    /// Capture groups of the route regex that matched the path; index 0 is
    /// the whole match.
    pub matches: Vec<String>,
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
}

impl HttpRequest {
    /// A blank request.
    pub fn new() -> HttpRequest {
        HttpRequest::default()
    }

    /// Clears everything so the value can parse the next request on a
    /// persistent connection.
    pub fn reset(&mut self) {
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.matches.clear();
        self.headers.clear();
        self.params.clear();
    }

    /// Inserts a header, replacing any previous value. Keys are
    /// case-sensitive.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Whether the header is present.
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// The header's value, if present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Inserts a query parameter.
    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// The query parameter's value, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The declared body length. Absent or unparseable headers mean a
    /// zero-length body.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the client asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive")
    }
}
