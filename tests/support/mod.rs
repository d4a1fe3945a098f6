//! Purpose: Shared fixtures for integration tests.
//! Exports: `ScriptedExchange`, `LoopbackServer`, config/client builders, JSON fixtures.
//! Role: Stand-ins for the remote API so tests never leave the process or loopback.
//! Invariants: Unscripted routes answer 404 so missing stubs fail loudly.
#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use vrcapi::api::{
    Client, ClientConfig, Credentials, Error, ErrorKind, Exchange, LoginOutcome, Method,
    RetryPolicy, User, WireRequest, WireResponse,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const BASE_URL: &str = "http://api.test/api/1";
pub const API_KEY: &str = "test-api-key";

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
pub enum Reply {
    Response(WireResponse),
    NetworkError,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Response(WireResponse::json(status, &body))
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// The `{"error": {"message", "status_code"}}` envelope the API uses for failures.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(
            status,
            json!({"error": {"message": format!("\"{message}\""), "status_code": status}}),
        )
    }

    pub fn with_cookie(self, cookie: &str) -> Self {
        match self {
            Reply::Response(response) => {
                Reply::Response(response.with_header("Set-Cookie", cookie))
            }
            Reply::NetworkError => Reply::NetworkError,
        }
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Reply::Response(response) => Reply::Response(response.with_header(name, value)),
            Reply::NetworkError => Reply::NetworkError,
        }
    }
}

type Handler = Box<dyn Fn(&WireRequest) -> Reply + Send + Sync>;

enum Responder {
    /// Replies in order; the last one repeats.
    Queue(VecDeque<Reply>),
    Func(Handler),
}

struct Route {
    method: Method,
    path: String,
    responder: Responder,
}

#[derive(Default)]
struct Script {
    routes: Vec<Route>,
    requests: Vec<WireRequest>,
}

/// In-process `Exchange` answering from scripted routes and recording every request.
#[derive(Clone, Default)]
pub struct ScriptedExchange {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `method path`; a later call for the same route replaces it.
    pub fn on(&self, method: Method, path: &str, replies: Vec<Reply>) -> &Self {
        self.install(method, path, Responder::Queue(replies.into()));
        self
    }

    pub fn on_fn(
        &self,
        method: Method,
        path: &str,
        handler: impl Fn(&WireRequest) -> Reply + Send + Sync + 'static,
    ) -> &Self {
        self.install(method, path, Responder::Func(Box::new(handler)));
        self
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.script().requests.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.script()
            .requests
            .iter()
            .filter(|request| request.method == method && api_path(request) == path)
            .count()
    }

    pub fn last(&self, method: Method, path: &str) -> Option<WireRequest> {
        self.script()
            .requests
            .iter()
            .rev()
            .find(|request| request.method == method && api_path(request) == path)
            .cloned()
    }

    pub fn clear_requests(&self) {
        self.script().requests.clear();
    }

    fn install(&self, method: Method, path: &str, responder: Responder) {
        let mut script = self.script();
        script
            .routes
            .retain(|route| !(route.method == method && route.path == path));
        script.routes.push(Route {
            method,
            path: path.to_string(),
            responder,
        });
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Exchange for ScriptedExchange {
    fn exchange(&self, request: &WireRequest) -> Result<WireResponse, Error> {
        let mut script = self.script();
        script.requests.push(request.clone());
        let path = api_path(request);
        let route = script
            .routes
            .iter_mut()
            .find(|route| route.method == request.method && route.path == path);
        let reply = match route {
            Some(route) => match &mut route.responder {
                Responder::Queue(queue) if queue.len() > 1 => queue.pop_front(),
                Responder::Queue(queue) => queue.front().cloned(),
                Responder::Func(handler) => Some(handler(request)),
            },
            None => None,
        };
        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::NetworkError) => {
                Err(Error::new(ErrorKind::Network).with_message("connection reset"))
            }
            None => Ok(WireResponse::json(
                404,
                &json!({"error": {"message": format!("no route for {path}"), "status_code": 404}}),
            )),
        }
    }
}

/// Request path relative to the API root (`/users/usr_1`).
pub fn api_path(request: &WireRequest) -> String {
    let path = request.path();
    path.strip_prefix("/api/1").unwrap_or(path).to_string()
}

pub fn config() -> ClientConfig {
    ClientConfig::new()
        .with_base_url(BASE_URL)
        .expect("test base url")
        .with_api_key(API_KEY)
        .with_retry(RetryPolicy::immediate())
}

pub fn client(exchange: &ScriptedExchange) -> Client {
    Client::with_exchange(config(), exchange.clone())
}

pub fn user_json(id: &str, display_name: &str) -> Value {
    json!({
        "id": id,
        "displayName": display_name,
        "username": display_name.to_lowercase(),
        "bio": "",
        "status": "active",
        "state": "online",
        "location": "offline",
        "tags": ["system_trust_basic"],
        "isFriend": false,
    })
}

pub fn world_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "authorId": "usr_author",
        "capacity": 16,
        "releaseStatus": "public",
        "tags": [],
    })
}

pub fn avatar_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "authorId": "usr_author",
        "releaseStatus": "public",
        "imageUrl": format!("https://files.test/{id}.png"),
    })
}

/// Scripts a plain password login for `usr_me` and runs it.
pub fn logged_in(exchange: &ScriptedExchange) -> TestResult<(Client, User)> {
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::ok(user_json("usr_me", "Me")).with_cookie("auth=authcookie_1; Path=/; HttpOnly")],
    );
    let mut client = client(exchange);
    match client.login(Credentials::password("me", "secret"))? {
        LoginOutcome::Authenticated(_) => {}
        LoginOutcome::TwoFactorRequired(_) => return Err("unexpected two-factor challenge".into()),
    }
    let me = client.current_user()?;
    Ok((client, me))
}

/// Single-threaded HTTP/1.1 responder on loopback; one canned response per connection.
pub struct LoopbackServer {
    pub base_url: String,
    handle: Option<JoinHandle<Vec<String>>>,
}

impl LoopbackServer {
    pub fn start(responses: Vec<String>) -> TestResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for response in responses {
                let Some(mut stream) = accept_until(&listener, Instant::now() + ACCEPT_TIMEOUT)
                else {
                    break;
                };
                match read_request(&mut stream) {
                    Ok(request) => requests.push(request),
                    Err(_) => break,
                }
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
            requests
        });
        Ok(Self {
            base_url: format!("http://{addr}/api/1"),
            handle: Some(handle),
        })
    }

    /// Waits for every scripted response to be served and returns the raw requests.
    pub fn finish(mut self) -> Vec<String> {
        self.handle
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

pub fn http_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    response.push_str("Content-Type: application/json\r\n");
    response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    response.push_str("Connection: close\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response
}

fn accept_until(listener: &TcpListener, deadline: Instant) -> Option<TcpStream> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).ok()?;
                stream.set_read_timeout(Some(ACCEPT_TIMEOUT)).ok()?;
                return Some(stream);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = stream.read(&mut buf)?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buf[..read]);
        if let Some(end) = find_subslice(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..end]).to_string();
            if data.len() >= end + 4 + content_length(&head) {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&data).to_string())
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
