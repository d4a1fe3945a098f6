//! Purpose: Client configuration and the bounded retry/2FA policies.
//! Exports: `ClientConfig`, `RetryPolicy`, `TwoFactorPolicy`, `DEFAULT_BASE_URL`.
//! Role: Plain values handed to `Client`; no hidden globals.
//! Invariants: Base URLs are http(s), carry no query or fragment, and end without `/`.
//! Invariants: Every retry bound is finite.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.vrchat.cloud/api/1";

const ENV_BASE_URL: &str = "VRC_API_URL";
const ENV_USER_AGENT: &str = "VRC_USER_AGENT";
const ENV_API_KEY: &str = "VRC_API_KEY";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_rate_limit_retries: u32,
    pub max_transient_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            max_rate_limit_retries: 3,
            max_transient_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// No retries at all; every failure surfaces on the first attempt.
    pub fn none() -> Self {
        Self {
            max_rate_limit_retries: 0,
            max_transient_retries: 0,
            ..Self::new()
        }
    }

    /// Same bounds as [`RetryPolicy::new`] without sleeping between attempts.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Self::new()
        }
    }

    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay actually slept: jittered into `[backoff/2, backoff]`, raised to the
    /// server's `Retry-After` hint, and never above `max_delay`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>, unit: f64) -> Duration {
        let backoff = self.backoff(attempt);
        let mut delay = if self.jitter {
            let unit = unit.clamp(0.0, 1.0);
            backoff.mul_f64(0.5 + unit * 0.5)
        } else {
            backoff
        };
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TwoFactorPolicy {
    pub max_attempts: u32,
    pub challenge_ttl: Duration,
}

impl TwoFactorPolicy {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            challenge_ttl: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }
}

impl Default for TwoFactorPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: Url,
    pub user_agent: String,
    pub api_key: Option<String>,
    pub fetch_api_key: bool,
    pub page_size: usize,
    pub retry: RetryPolicy,
    pub two_factor: TwoFactorPolicy,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url"),
            user_agent: default_user_agent(),
            api_key: None,
            fetch_api_key: true,
            page_size: 100,
            retry: RetryPolicy::new(),
            two_factor: TwoFactorPolicy::new(),
        }
    }

    /// Defaults overridden by `VRC_API_URL`, `VRC_USER_AGENT` and `VRC_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();
        if let Some(base_url) = env_value(ENV_BASE_URL) {
            config = config.with_base_url(base_url)?;
        }
        if let Some(user_agent) = env_value(ENV_USER_AGENT) {
            config.user_agent = user_agent;
        }
        if let Some(api_key) = env_value(ENV_API_KEY) {
            config.api_key = Some(api_key);
        }
        Ok(config)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, Error> {
        self.base_url = normalize_base_url(base_url.into())?;
        Ok(self)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Uses a fixed api key and skips the `/config` bootstrap.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn without_api_key_fetch(mut self) -> Self {
        self.fetch_api_key = false;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_two_factor(mut self, two_factor: TwoFactorPolicy) -> Self {
        self.two_factor = two_factor;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_user_agent() -> String {
    format!("vrcapi/{}", env!("CARGO_PKG_VERSION"))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn normalize_base_url(raw: String) -> Result<Url, Error> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid api base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("api base url must use http or https scheme")
        );
    }
    if url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::Usage).with_message("api base url cannot be a base"));
    }
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
