//! A small HTTP server exercising routes, query strings and static files.
//!
//! Static assets are served from `./wwwroot`; `/hello`, `/login`, `/DEL`
//! echo the request back, and PUT `/testput.txt` writes its body to disk.

use vev_http::{HttpRequest, HttpServer};

const WWWROOT: &str = "./wwwroot";

fn request_text(req: &HttpRequest) -> String {
    let mut out = format!("{} {} {}\r\n", req.method, req.path, req.version);
    for key in ["Host", "Connection", "Content-Length"] {
        if let Some(value) = req.header(key) {
            out.push_str(&format!("{key}: {value}\r\n"));
        }
    }
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(&req.body));
    out
}

fn main() {
    env_logger::init();

    let mut server = HttpServer::new(8086);
    server.set_thread_count(3);
    server.set_base_dir(WWWROOT);
    server.get("/hello", |req, resp| {
        resp.set_content(request_text(req), "text/plain");
    });
    server.post("/login", |req, resp| {
        resp.set_content(request_text(req), "text/plain");
    });
    server.put("/testput.txt", |req, resp| {
        let path = format!("{WWWROOT}{}", req.path);
        if let Err(e) = vev_http::util::write_file(&path, &req.body) {
            eprintln!("writing {path} failed: {e}");
            resp.status = 500;
        }
    });
    server.delete("/DEL", |req, resp| {
        resp.set_content(request_text(req), "text/plain");
    });
    server.listen()
}
