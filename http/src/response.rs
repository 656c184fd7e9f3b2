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

//! The response model handlers fill in.

use std::collections::HashMap;

/// An HTTP response under construction: status, headers, body and an
/// optional redirect target.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code; defaults to 200.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
    headers: HashMap<String, String>,
    redirect: Option<String>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl HttpResponse {
    /// A response with the given status and nothing else.
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            body: Vec::new(),
            headers: HashMap::new(),
            redirect: None,
        }
    }

    /// Back to an empty 200.
    pub fn reset(&mut self) {
        self.status = 200;
        self.body.clear();
        self.headers.clear();
        self.redirect = None;
    }

    /// Inserts a header, replacing any previous value.
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

    /// Iterates over all headers set so far.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sets the body and its content type in one go.
    pub fn set_content(&mut self, body: impl Into<Vec<u8>>, content_type: &str) {
        self.body = body.into();
        self.set_header("Content-Type", content_type);
    }

    /// Turns the response into a redirect to `url`.
    pub fn set_redirect(&mut self, url: impl Into<String>, status: u16) {
        self.status = status;
        self.redirect = Some(url.into());
    }

    /// The redirect target, when one was set.
    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }
}
