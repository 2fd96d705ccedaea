//! Loopback HTTP server for exercising `ApiClient` against scripted replies.

use crate::airtable::client::ApiClient;
use crate::archive::config::ApiConfig;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct Reply {
    pub status: u16,
    pub body: Value,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: serde_json::json!({"error": {"type": "SCRIPTED"}}),
            delay: Duration::ZERO,
        }
    }

    pub fn after_millis(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

/// `(method, decoded path, how many times this pair was seen before)`.
type Handler = dyn Fn(&str, &str, usize) -> Reply + Send + Sync;

pub struct FakeHttp {
    pub base_url: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl FakeHttp {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake http");
        let addr = listener.local_addr().expect("fake http addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);
        let log = seen.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let handler = handler.clone();
                let log = log.clone();
                thread::spawn(move || serve(stream, handler.as_ref(), &log));
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            seen,
        }
    }

    pub fn client(&self, timeout_secs: u64, retries: u64) -> ApiClient {
        let api = ApiConfig {
            api_key: "patFake".into(),
            base_url: self.base_url.clone(),
            timeout_secs,
            retries,
            min_interval_ms: 0,
            ..ApiConfig::default()
        };
        ApiClient::new(&api).expect("client")
    }

    /// Requests received so far, as `METHOD /path`.
    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().expect("fake http log").clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        let wanted = format!("{method} {path}");
        self.requests().iter().filter(|r| **r == wanted).count()
    }
}

fn serve(stream: TcpStream, handler: &Handler, seen: &Mutex<Vec<String>>) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().replace("%20", " ");
    let key = format!("{method} {path}");

    let previous = {
        let mut log = seen.lock().expect("fake http log");
        let previous = log.iter().filter(|r| **r == key).count();
        log.push(key);
        previous
    };
    let reply = handler(&method, &path, previous);
    thread::sleep(reply.delay);

    let text = reply.body.to_string();
    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{text}",
        reply.status,
        text.len()
    );
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
