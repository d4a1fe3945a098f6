//! Purpose: Execute one API call over HTTP with cookies, api key and bounded retries.
//! Exports: `Method`, `Call`, `WireRequest`, `WireResponse`, `Exchange`, `UreqExchange`, `Transport`.
//! Role: Lowest layer; `AuthSession` lends it the `Session` for every call.
//! Invariants: `Unauthorized` is never retried here.
//! Invariants: Only idempotent methods are retried on network errors or 502/503/504.
//! Invariants: Rate-limit retries are bounded by the policy and back off exponentially.
//! Invariants: Rotated cookies are absorbed from every response, success or not.
#![allow(clippy::result_large_err)]

use super::config::{ClientConfig, RetryPolicy};
use super::session::Session;
use crate::core::error::{Error, ErrorKind};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_idempotent(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// One logical API call, relative to the configured base url.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl Call {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            method,
            segments: segments
                .into_iter()
                .map(|segment| segment.as_ref().to_string())
                .collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Method::Get, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Method::Post, segments)
    }

    pub fn put<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Method::Put, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Method::Delete, segments)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Path below the base url, for logs and error context.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

#[derive(Clone, Debug)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).with_header("Content-Type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, value)| value.as_str())
    }

    /// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header("retry-after")?.trim();
        value.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// A single raw HTTP exchange. Implementations apply no retry or status policy;
/// non-2xx statuses are ordinary responses and only connection-level failures
/// are errors (`ErrorKind::Network`).
pub trait Exchange: Send + Sync {
    fn exchange(&self, request: &WireRequest) -> ApiResult<WireResponse>;
}

#[derive(Clone)]
pub struct UreqExchange {
    agent: ureq::Agent,
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl UreqExchange {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    /// Trusts only the certificates in the PEM file at `path`.
    pub fn with_tls_ca_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "failed to read TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no certificates"));
        }

        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = ureq::rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no parsable certificates"));
        }

        let tls_config = ureq::rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        Ok(Self::with_agent(agent))
    }

    /// Disables certificate verification entirely.
    pub fn with_tls_skip_verify() -> Self {
        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let tls_config = ureq::rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        Self::with_agent(agent)
    }
}

impl Default for UreqExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for UreqExchange {
    fn exchange(&self, request: &WireRequest) -> ApiResult<WireResponse> {
        let mut outgoing = self
            .agent
            .request(request.method.as_str(), request.url.as_str());
        for (name, value) in &request.headers {
            outgoing = outgoing.set(name, value);
        }
        let result = match &request.body {
            Some(body) => outgoing.send_string(body),
            None => outgoing.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Network)
                    .with_message("request failed")
                    .with_source(err));
            }
        };
        read_wire_response(response)
    }
}

fn read_wire_response(response: ureq::Response) -> ApiResult<WireResponse> {
    let status = response.status();
    let mut headers = Vec::new();
    for name in response.headers_names() {
        for value in response.all(&name) {
            headers.push((name.clone(), value.to_string()));
        }
    }
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Network)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    Ok(WireResponse {
        status,
        headers,
        body,
    })
}

pub struct Transport {
    base_url: Url,
    user_agent: String,
    retry: RetryPolicy,
    exchange: Box<dyn Exchange>,
}

impl Transport {
    pub fn new(config: &ClientConfig, exchange: impl Exchange + 'static) -> Self {
        Self {
            base_url: config.base_url().clone(),
            user_agent: config.user_agent.clone(),
            retry: config.retry.clone(),
            exchange: Box::new(exchange),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `call` to completion under the retry policy and decodes the JSON body.
    pub fn execute(&self, session: &mut Session, call: &Call) -> ApiResult<Value> {
        let path = call.path();
        let mut rate_limited = 0u32;
        let mut transient = 0u32;
        loop {
            let request = self.build_request(session, call)?;
            tracing::debug!(method = call.method().as_str(), path = %path, "api request");

            let (err, retry_after) = match self.exchange.exchange(&request) {
                Ok(response) => {
                    absorb_cookies(session, &response);
                    let retry_after = response.retry_after();
                    match decode_response(response) {
                        Ok(value) => return Ok(value),
                        Err(err) => (err, retry_after),
                    }
                }
                Err(err) => (err, None),
            };
            let err = err.with_path(path.clone());

            let attempt = match err.kind() {
                ErrorKind::RateLimited if rate_limited < self.retry.max_rate_limit_retries => {
                    rate_limited += 1;
                    rate_limited - 1
                }
                ErrorKind::Network | ErrorKind::ServerError
                    if call.method().is_idempotent()
                        && is_transient_failure(&err)
                        && transient < self.retry.max_transient_retries =>
                {
                    transient += 1;
                    transient - 1
                }
                _ => {
                    if err.kind().is_transient() {
                        tracing::warn!(
                            method = call.method().as_str(),
                            path = %path,
                            kind = ?err.kind(),
                            rate_limited,
                            transient,
                            "api request failed after retries"
                        );
                    }
                    return Err(err);
                }
            };

            let delay = self.retry.delay(attempt, retry_after, jitter_unit());
            tracing::warn!(
                method = call.method().as_str(),
                path = %path,
                kind = ?err.kind(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying api request"
            );
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }

    fn build_request(&self, session: &Session, call: &Call) -> ApiResult<WireRequest> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                Error::new(ErrorKind::Usage).with_message("api base url cannot be a base")
            })?;
            path.pop_if_empty();
            for segment in &call.segments {
                path.push(segment);
            }
        }
        if !call.query.is_empty() || session.api_key().is_some() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &call.query {
                pairs.append_pair(key, value);
            }
            if let Some(api_key) = session.api_key() {
                pairs.append_pair("apiKey", api_key);
            }
        }

        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(cookie) = session.cookie_header() {
            headers.push(("Cookie".to_string(), cookie));
        }
        let body = match &call.body {
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(payload)
            }
            None => None,
        };
        headers.extend(call.headers.iter().cloned());

        Ok(WireRequest {
            method: call.method,
            url,
            headers,
            body,
        })
    }
}

fn absorb_cookies(session: &mut Session, response: &WireResponse) {
    for header in response.set_cookies() {
        if let Some(name) = session.absorb_set_cookie(header) {
            tracing::debug!(cookie = %name, "session cookie rotated");
        }
    }
}

fn decode_response(response: WireResponse) -> ApiResult<Value> {
    let status = response.status;
    if (200..300).contains(&status) {
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&response.body).map_err(|err| {
            Error::new(ErrorKind::InvalidResponse)
                .with_message("invalid response json")
                .with_status(status)
                .with_source(err)
        });
    }
    Err(status_error(status, &response.body))
}

/// Maps a non-2xx response to an error, carrying the server's message when it sent one.
pub(crate) fn status_error(status: u16, body: &str) -> Error {
    let message = error_message(body);
    let kind = match status {
        400 => match message.as_deref() {
            Some(text) if text.contains("not friends") => ErrorKind::NotFriends,
            Some(text) if text.contains("already friends") => ErrorKind::AlreadyFriends,
            _ => ErrorKind::BadRequest,
        },
        401 => ErrorKind::Unauthorized,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::BadRequest,
    };
    let message = message.unwrap_or_else(|| format!("remote error status {status}"));
    Error::new(kind).with_status(status).with_message(message)
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = match value.get("error") {
        Some(Value::Object(error)) => error.get("message").and_then(Value::as_str),
        Some(Value::String(message)) => Some(message.as_str()),
        _ => value.get("message").and_then(Value::as_str),
    }?;
    let message = message.trim().trim_matches('"').trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}

fn is_transient_failure(err: &Error) -> bool {
    match err.kind() {
        ErrorKind::Network => true,
        ErrorKind::ServerError => matches!(err.status(), Some(502..=504)),
        _ => false,
    }
}

fn jitter_unit() -> f64 {
    let mut bytes = [0u8; 8];
    match getrandom::fill(&mut bytes) {
        Ok(()) => (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64,
        Err(_) => 1.0,
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
