//! In-process HTTP/1.1 fixture server for the integration tests.
//!
//! Serves canned responses per path, records every request path, and tracks
//! how many requests it was serving at the same time.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A canned response.
#[derive(Clone, Debug)]
pub struct Route {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Held before the response is written.
    pub delay: Duration,
    /// Answer this many requests with 503 before serving the route.
    pub fail_first: usize,
}

impl Route {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body: body.into(),
            delay: Duration::ZERO,
            fail_first: 0,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Route::ok("text/plain", format!("status {status}"))
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn flaky(mut self, failures: usize) -> Self {
        self.fail_first = failures;
        self
    }
}

#[derive(Default)]
struct State {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture server");
        let addr = listener.local_addr().expect("fixture server address");
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// `host:port`, for building scheme-relative links.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    pub fn route(&self, path: &str, route: Route) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), route);
    }

    /// Serve `<img>` tags for `srcs` as an HTML page at `path`.
    pub fn gallery(&self, path: &str, srcs: &[String]) {
        let imgs: String = srcs
            .iter()
            .map(|s| format!("<div class=\"item\"><img src=\"{s}\" alt=\"\"></div>\n"))
            .collect();
        let html = format!(
            "<!DOCTYPE html><html><head><title>Gallery</title></head><body>\n{imgs}</body></html>"
        );
        self.route(path, Route::ok("text/html; charset=utf-8", html));
    }

    /// Serve a solid-colour PNG of `w`×`h` pixels at `path`.
    pub fn png(&self, path: &str, w: u32, h: u32) {
        self.route(path, Route::ok("image/png", png_bytes(w, h)));
    }

    pub fn hits(&self) -> Vec<String> {
        self.state.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self, path: &str) -> usize {
        self.hits().iter().filter(|p| p.as_str() == path).count()
    }

    /// Highest number of requests served at once so far.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([40, 90, 160])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode fixture png");
    buf
}

pub fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 60, 20])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("encode fixture jpeg");
    buf
}

async fn serve(mut stream: TcpStream, state: Arc<State>) {
    let Some(path) = read_request_path(&mut stream).await else {
        return;
    };
    state.hits.lock().unwrap().push(path.clone());

    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let route = {
        let mut routes = state.routes.lock().unwrap();
        match routes.get_mut(&path) {
            Some(r) if r.fail_first > 0 => {
                r.fail_first -= 1;
                Route::status(503)
            }
            Some(r) => r.clone(),
            None => Route::status(404),
        }
    };

    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }
    // Decrement before writing: once the body is on the wire the client may
    // free its slot and start the next request.
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        reason(route.status),
        route.content_type,
        route.body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&route.body).await;
    let _ = stream.shutdown().await;
}

async fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&buf);
    let line = request.lines().next()?;
    line.split_whitespace().nth(1).map(str::to_string)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
