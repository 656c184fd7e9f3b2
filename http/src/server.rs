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

//! The HTTP server: route tables, static files and response assembly.
//!
//! Routes are ordered `(regex, handler)` pairs per method; the first pattern
//! that matches the whole path wins and its captures land in the request.
//! GET and HEAD requests under the base directory that resolve to a regular
//! file are served directly. Requests that fail to parse get an error page
//! and a half-closed connection.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::debug;
use regex::Regex;
use vev::buffer::Buffer;
use vev::connection::Connection;
use vev::server::TcpServer;

use crate::context::{HttpContext, RecvState};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::status::{mime_for, reason_phrase};
use crate::util;

const DEFAULT_TIMEOUT: u32 = 10;

/// A route handler: reads the matched request, fills in the response.
pub type Handler = dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync;

struct Router {
    get: Vec<(Regex, Arc<Handler>)>,
    post: Vec<(Regex, Arc<Handler>)>,
    put: Vec<(Regex, Arc<Handler>)>,
    delete: Vec<(Regex, Arc<Handler>)>,
    base_dir: Option<String>,
}

/// An HTTP/1.1 server over [`TcpServer`].
pub struct HttpServer {
    server: TcpServer,
    router: Router,
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("routes", &{
                self.router.get.len()
                    + self.router.post.len()
                    + self.router.put.len()
                    + self.router.delete.len()
            })
            .field("base_dir", &self.router.base_dir)
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    /// A server on `port` with the default 10-second idle timeout.
    pub fn new(port: u16) -> HttpServer {
        let mut server = TcpServer::new(port);
        server.set_idle_timeout(DEFAULT_TIMEOUT);
        HttpServer {
            server,
            router: Router {
                get: Vec::new(),
                post: Vec::new(),
                put: Vec::new(),
                delete: Vec::new(),
                base_dir: None,
            },
        }
    }

    /// Registers a GET (and HEAD) route. `pattern` must match the whole
    /// decoded path; invalid patterns are rejected at registration.
    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        self.router.get.push(compile(pattern, handler));
    }

    /// Registers a POST route.
    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        self.router.post.push(compile(pattern, handler));
    }

    /// Registers a PUT route.
    pub fn put(
        &mut self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        self.router.put.push(compile(pattern, handler));
    }

    /// Registers a DELETE route.
    pub fn delete(
        &mut self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) {
        self.router.delete.push(compile(pattern, handler));
    }

    /// Sets the static-file root. Must name an existing directory.
    pub fn set_base_dir(&mut self, dir: impl Into<String>) {
        let dir = dir.into();
        assert!(
            util::is_directory(&dir),
            "static base dir {dir:?} is not a directory"
        );
        self.router.base_dir = Some(dir);
    }

    /// Number of worker loops for connection handling.
    pub fn set_thread_count(&mut self, count: usize) {
        self.server.set_thread_count(count);
    }

    /// Seconds before an idle connection is evicted; zero disables.
    pub fn set_idle_timeout(&mut self, seconds: u32) {
        self.server.set_idle_timeout(seconds);
    }

    /// Starts serving and never returns.
    pub fn listen(self) -> ! {
        let router = Arc::new(self.router);
        let mut server = self.server;
        server.set_connected_callback(|conn| {
            conn.set_context(Box::new(HttpContext::new()));
        });
        server.set_message_callback(move |conn, buf| {
            on_message(&router, conn, buf);
        });
        server.start()
    }
}

fn compile(
    pattern: &str,
    handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
) -> (Regex, Arc<Handler>) {
    let regex = Regex::new(pattern)
        .unwrap_or_else(|e| panic!("invalid route pattern {pattern:?}: {e}"));
    (regex, Arc::new(handler))
}

// The message pump: parse as many complete requests as the buffer holds,
// answering each, until the input runs dry or the connection is shut down.
fn on_message(router: &Arc<Router>, conn: &Rc<Connection>, buf: &mut Buffer) {
    loop {
        let mut guard = conn.context();
        let Some(context) = guard.downcast_mut::<HttpContext>() else {
            // The connection was upgraded away from HTTP mid-stream.
            return;
        };
        context.recv(buf);

        if context.resp_status() >= 400 {
            let status = context.resp_status();
            let request = std::mem::take(context.request_mut());
            context.reset();
            drop(guard);

            let mut response = HttpResponse::new(status);
            error_page(&mut response);
            let leftover = buf.len();
            buf.consume(leftover);
            write_response(conn, &request, &mut response);
            conn.shutdown();
            return;
        }
        if context.state() != RecvState::Over {
            // Wait for the rest of the request.
            return;
        }

        let mut request = std::mem::take(context.request_mut());
        context.reset();
        drop(guard);

        let mut response = HttpResponse::default();
        route(router, &mut request, &mut response);
        if response.status >= 400 && response.body.is_empty() {
            error_page(&mut response);
        }
        write_response(conn, &request, &mut response);

        if !request.keep_alive() {
            conn.shutdown();
            return;
        }
        if buf.is_empty() {
            return;
        }
    }
}

fn route(router: &Router, request: &mut HttpRequest, response: &mut HttpResponse) {
    if is_file_request(router, request) {
        return file_handler(router, request, response);
    }
    let table = match request.method.as_str() {
        "GET" | "HEAD" => &router.get,
        "POST" => &router.post,
        "PUT" => &router.put,
        "DELETE" => &router.delete,
        _ => {
            response.status = 404;
            return;
        }
    };
    for (pattern, handler) in table {
        if let Some(caps) = pattern.captures(&request.path) {
            let whole = caps.get(0).expect("group 0 always participates");
            if whole.start() != 0 || whole.end() != request.path.len() {
                continue;
            }
            request.matches = caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            return handler(request, response);
        }
    }
    debug!("no route for {} {}", request.method, request.path);
    response.status = 404;
}

fn resolve_static(router: &Router, path: &str) -> Option<String> {
    let base = router.base_dir.as_ref()?;
    let mut real = format!("{base}{path}");
    if real.ends_with('/') {
        real.push_str("index.html");
    }
    Some(real)
}

fn is_file_request(router: &Router, request: &HttpRequest) -> bool {
    if router.base_dir.is_none() {
        return false;
    }
    if request.method != "GET" && request.method != "HEAD" {
        return false;
    }
    if !util::valid_path(&request.path) {
        return false;
    }
    match resolve_static(router, &request.path) {
        Some(real) => util::is_regular(&real),
        None => false,
    }
}

fn file_handler(router: &Router, request: &HttpRequest, response: &mut HttpResponse) {
    let Some(real) = resolve_static(router, &request.path) else {
        response.status = 404;
        return;
    };
    match util::read_file(&real) {
        Ok(body) => {
            response.body = body;
            response.set_header("Content-Type", mime_for(&real));
        }
        Err(e) => {
            debug!("static file {real:?} unreadable: {e}");
            response.status = 404;
        }
    }
}

fn error_page(response: &mut HttpResponse) {
    let reason = reason_phrase(response.status);
    let page = format!(
        "<html><head><title>{status} {reason}</title></head>\
         <body><h1>{status} {reason}</h1></body></html>",
        status = response.status,
    );
    response.set_content(page, "text/html");
}

// Serializes the response and hands it to the connection: status line,
// headers (with Content-Length/Content-Type/Connection/Location filled in),
// blank line, body.
fn write_response(conn: &Rc<Connection>, request: &HttpRequest, response: &mut HttpResponse) {
    if !response.has_header("Content-Length") && !response.body.is_empty() {
        response.set_header("Content-Length", response.body.len().to_string());
    }
    if !response.has_header("Content-Type") {
        response.set_header("Content-Type", "application/octet-stream");
    }
    if response.status / 100 == 3 {
        if let Some(url) = response.redirect() {
            let url = url.to_string();
            response.set_header("Location", url);
        }
    }
    if request.keep_alive() {
        response.set_header("Connection", "keep-alive");
    } else {
        response.set_header("Connection", "close");
    }

    let mut wire = Vec::with_capacity(response.body.len() + 256);
    wire.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            response.status,
            reason_phrase(response.status)
        )
        .as_bytes(),
    );
    for (key, value) in response.headers() {
        wire.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
    }
    wire.extend_from_slice(b"\r\n");
    wire.extend_from_slice(&response.body);
    conn.send(&wire);
}

#[cfg(test)]
mod test {
    use super::*;

    fn router_with(
        get: Vec<(&str, Arc<Handler>)>,
        base_dir: Option<String>,
    ) -> Router {
        Router {
            get: get
                .into_iter()
                .map(|(p, h)| (Regex::new(p).unwrap(), h))
                .collect(),
            post: Vec::new(),
            put: Vec::new(),
            delete: Vec::new(),
            base_dir,
        }
    }

    fn get_request(path: &str) -> HttpRequest {
        let mut request = HttpRequest::new();
        request.method = "GET".to_string();
        request.path = path.to_string();
        request.version = "HTTP/1.1".to_string();
        request
    }

    #[test]
    fn first_full_match_wins_and_captures() {
        let handler: Arc<Handler> = Arc::new(|req, resp| {
            resp.set_content(format!("user {}", req.matches[1]), "text/plain");
        });
        let shadow: Arc<Handler> = Arc::new(|_, resp| resp.status = 500);
        let router = router_with(
            vec![("/user/(\\d+)", handler), ("/user/(.*)", shadow)],
            None,
        );

        let mut request = get_request("/user/42");
        let mut response = HttpResponse::default();
        route(&router, &mut request, &mut response);

        assert_eq!(200, response.status);
        assert_eq!(b"user 42".to_vec(), response.body);
        assert_eq!(vec!["/user/42".to_string(), "42".to_string()], request.matches);
    }

    #[test]
    fn partial_matches_do_not_route() {
        let handler: Arc<Handler> = Arc::new(|_, resp| resp.status = 204);
        let router = router_with(vec![("/exact", handler)], None);

        let mut request = get_request("/exactly-not");
        let mut response = HttpResponse::default();
        route(&router, &mut request, &mut response);
        assert_eq!(404, response.status);
    }

    #[test]
    fn unknown_method_is_a_404() {
        let router = router_with(Vec::new(), None);
        let mut request = get_request("/x");
        request.method = "OPTIONS".to_string();
        let mut response = HttpResponse::default();
        route(&router, &mut request, &mut response);
        assert_eq!(404, response.status);
    }

    #[test]
    fn escaping_paths_never_reach_the_filesystem() {
        let router = router_with(Vec::new(), Some("/tmp".to_string()));
        let request = get_request("/../etc/passwd");
        assert!(!is_file_request(&router, &request));
    }

    #[test]
    fn head_uses_the_get_table() {
        let handler: Arc<Handler> = Arc::new(|_, resp| resp.status = 204);
        let router = router_with(vec![("/probe", handler)], None);
        let mut request = get_request("/probe");
        request.method = "HEAD".to_string();
        let mut response = HttpResponse::default();
        route(&router, &mut request, &mut response);
        assert_eq!(204, response.status);
    }
}
