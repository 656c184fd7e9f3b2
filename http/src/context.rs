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

//! Resumable request parsing.
//!
//! A request can arrive across any number of readiness events. The context
//! remembers which section it is in (request line, headers, body) and each
//! [`HttpContext::recv`] consumes only what it can parse completely, leaving
//! the rest buffered for the next call. On a persistent connection the
//! caller resets the context between requests.

use once_cell::sync::Lazy;
use regex::Regex;
use vev::Buffer;

use crate::request::HttpRequest;
use crate::util::url_decode;

/// Hard ceiling for the request line and each header line.
pub const MAX_LINE: usize = 8192;

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+) ([^?\s]+)(?:\?(.*))? (HTTP/1\.[01])(?:\r?\n)?$")
        .expect("request-line pattern is valid")
});

/// Which section of the request the parser is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// Waiting for the request line.
    Line,
    /// Waiting for header lines and the blank terminator.
    Head,
    /// Accumulating the declared body.
    Body,
    /// A full request is ready.
    Over,
    /// The request was malformed; `resp_status` says how.
    Error,
}

/// Parser state plus the partially built request.
#[derive(Debug)]
pub struct HttpContext {
    resp_status: u16,
    state: RecvState,
    request: HttpRequest,
}

impl Default for HttpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpContext {
    /// A fresh context waiting on a request line.
    pub fn new() -> HttpContext {
        HttpContext {
            resp_status: 200,
            state: RecvState::Line,
            request: HttpRequest::new(),
        }
    }

    /// Discards all partial state; parsing afterwards behaves exactly like a
    /// brand-new context.
    pub fn reset(&mut self) {
        self.resp_status = 200;
        self.state = RecvState::Line;
        self.request.reset();
    }

    /// The response status the parse outcome dictates: 200, or 400/414 once
    /// the state is [`RecvState::Error`].
    pub fn resp_status(&self) -> u16 {
        self.resp_status
    }

    /// Current parser state.
    pub fn state(&self) -> RecvState {
        self.state
    }

    /// The request parsed so far. Complete once the state is `Over`.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Mutable access, mainly for taking the finished request out.
    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    /// Feeds buffered bytes through the state machine. Sections cascade: a
    /// single call can take a request from the line state all the way to
    /// `Over` when everything has arrived.
    pub fn recv(&mut self, buf: &mut Buffer) {
        if self.state == RecvState::Line {
            self.recv_line(buf);
        }
        if self.state == RecvState::Head {
            self.recv_head(buf);
        }
        if self.state == RecvState::Body {
            self.recv_body(buf);
        }
    }

    fn fail(&mut self, status: u16) {
        self.state = RecvState::Error;
        self.resp_status = status;
    }

    fn recv_line(&mut self, buf: &mut Buffer) {
        let Some(line) = buf.take_line() else {
            // No terminator yet. If more than a line's worth has piled up,
            // one is never coming within bounds.
            if buf.len() > MAX_LINE {
                self.fail(414);
            }
            return;
        };
        if line.len() > MAX_LINE {
            self.fail(414);
            return;
        }
        if self.parse_request_line(&line) {
            self.state = RecvState::Head;
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            self.fail(400);
            return false;
        };
        let Some(caps) = REQUEST_LINE.captures(line) else {
            self.fail(400);
            return false;
        };
        self.request.method = caps[1].to_string();
        // The path is decoded without the plus convention; only query
        // strings use form encoding.
        self.request.path = url_decode(&caps[2], false);
        self.request.version = caps[4].to_string();

        if let Some(query) = caps.get(3) {
            for item in query.as_str().split('&').filter(|s| !s.is_empty()) {
                let Some(eq) = item.find('=') else {
                    self.fail(400);
                    return false;
                };
                let key = url_decode(&item[..eq], true);
                let value = url_decode(&item[eq + 1..], true);
                self.request.set_param(key, value);
            }
        }
        true
    }

    fn recv_head(&mut self, buf: &mut Buffer) {
        loop {
            let Some(line) = buf.take_line() else {
                if buf.len() > MAX_LINE {
                    self.fail(414);
                }
                return;
            };
            if line.len() > MAX_LINE {
                self.fail(414);
                return;
            }
            if line == b"\n" || line == b"\r\n" {
                self.state = RecvState::Body;
                return;
            }
            if !self.parse_header_line(&line) {
                return;
            }
        }
    }

    fn parse_header_line(&mut self, line: &[u8]) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            self.fail(400);
            return false;
        };
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        let Some(sep) = line.find(": ") else {
            self.fail(400);
            return false;
        };
        let key = &line[..sep];
        let value = &line[sep + 2..];
        self.request.set_header(key, value);
        true
    }

    fn recv_body(&mut self, buf: &mut Buffer) {
        let content_length = self.request.content_length();
        let needed = content_length.saturating_sub(self.request.body.len());
        if needed == 0 {
            self.state = RecvState::Over;
            return;
        }
        if buf.len() >= needed {
            self.request.body.extend_from_slice(&buf.readable()[..needed]);
            buf.consume(needed);
            self.state = RecvState::Over;
        } else {
            let available = buf.len();
            self.request.body.extend_from_slice(buf.readable());
            buf.consume(available);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn buffer_of(data: &str) -> Buffer {
        let mut buf = Buffer::new();
        buf.push_str(data);
        buf
    }

    #[test]
    fn parses_a_get_with_query_string() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of(
            "GET /hello?u=a&p=1%202 HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n",
        );
        ctx.recv(&mut buf);

        assert_eq!(RecvState::Over, ctx.state());
        assert_eq!(200, ctx.resp_status());
        let req = ctx.request();
        assert_eq!("GET", req.method);
        assert_eq!("/hello", req.path);
        assert_eq!("HTTP/1.1", req.version);
        assert_eq!(Some("a"), req.param("u"));
        assert_eq!(Some("1 2"), req.param("p"));
        assert_eq!(Some("x"), req.header("Host"));
        assert!(req.keep_alive());
        assert!(buf.is_empty());
    }

    #[test]
    fn percent_decodes_the_path_without_plus_folding() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("GET /a%20b+c HTTP/1.1\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Over, ctx.state());
        assert_eq!("/a b+c", ctx.request().path);
    }

    #[test]
    fn resumes_across_split_arrivals() {
        let mut ctx = HttpContext::new();

        let mut buf = buffer_of("GET /split HT");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Line, ctx.state());

        buf.push_str("TP/1.1\r\nHost: ");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Head, ctx.state());

        buf.push_str("x\r\nContent-Length: 4\r\n\r\nab");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Body, ctx.state());
        assert_eq!(b"ab".to_vec(), ctx.request().body);

        buf.push_str("cd");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Over, ctx.state());
        assert_eq!(b"abcd".to_vec(), ctx.request().body);
    }

    #[test]
    fn oversize_request_line_is_a_414() {
        let mut ctx = HttpContext::new();
        let long = "G".repeat(10_000);
        let mut buf = buffer_of(&long);
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Error, ctx.state());
        assert_eq!(414, ctx.resp_status());
    }

    #[test]
    fn oversize_terminated_line_is_also_a_414() {
        let mut ctx = HttpContext::new();
        let mut request = "GET /".to_string();
        request.push_str(&"a".repeat(9_000));
        request.push_str(" HTTP/1.1\r\n");
        let mut buf = buffer_of(&request);
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Error, ctx.state());
        assert_eq!(414, ctx.resp_status());
    }

    #[test]
    fn malformed_request_line_is_a_400() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("FETCH! / HTTP/1.1\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Error, ctx.state());
        assert_eq!(400, ctx.resp_status());
    }

    #[test]
    fn unsupported_version_is_a_400() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("GET / HTTP/2.0\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Error, ctx.state());
        assert_eq!(400, ctx.resp_status());
    }

    #[test]
    fn header_without_separator_is_a_400() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("GET / HTTP/1.1\r\nBogusHeader\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Error, ctx.state());
        assert_eq!(400, ctx.resp_status());
    }

    #[test]
    fn short_body_stalls_without_completing() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("GET /x HTTP/1.1\r\nContent-Length: 100\r\n\r\naaa");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Body, ctx.state());
        assert_eq!(3, ctx.request().body.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn reset_is_a_left_identity_for_parsing() {
        let mut ctx = HttpContext::new();
        let mut buf = buffer_of("GET /first HTTP/1.1\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Over, ctx.state());

        ctx.reset();
        let mut fresh = HttpContext::new();
        let mut buf_a = buffer_of("POST /second?k=v HTTP/1.0\r\nHost: y\r\n\r\n");
        let mut buf_b = buffer_of("POST /second?k=v HTTP/1.0\r\nHost: y\r\n\r\n");
        ctx.recv(&mut buf_a);
        fresh.recv(&mut buf_b);

        assert_eq!(fresh.state(), ctx.state());
        assert_eq!(fresh.resp_status(), ctx.resp_status());
        assert_eq!(fresh.request().method, ctx.request().method);
        assert_eq!(fresh.request().path, ctx.request().path);
        assert_eq!(fresh.request().version, ctx.request().version);
        assert_eq!(fresh.request().param("k"), ctx.request().param("k"));
    }

    #[test]
    fn pipelined_requests_parse_one_at_a_time() {
        let mut ctx = HttpContext::new();
        let mut buf =
            buffer_of("GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Over, ctx.state());
        assert_eq!("/a", ctx.request().path);

        ctx.reset();
        ctx.recv(&mut buf);
        assert_eq!(RecvState::Over, ctx.state());
        assert_eq!("/b", ctx.request().path);
        assert!(buf.is_empty());
    }
}
