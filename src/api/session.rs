// Cookie jar and api key for one client; owned by `AuthSession`, lent to `Transport`.
use std::collections::BTreeMap;

pub const AUTH_COOKIE: &str = "auth";
pub const TWO_FACTOR_COOKIE: &str = "twoFactorAuth";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    cookies: BTreeMap<String, String>,
    api_key: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The `auth` cookie; persist it to resume the session later.
    pub fn auth_token(&self) -> Option<&str> {
        self.cookie(AUTH_COOKIE)
    }

    pub fn two_factor_token(&self) -> Option<&str> {
        self.cookie(TWO_FACTOR_COOKIE)
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub(crate) fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub(crate) fn set_api_key(&mut self, api_key: impl Into<String>) {
        self.api_key = Some(api_key.into());
    }

    /// Drops every cookie; the api key is not a credential and survives.
    pub(crate) fn clear(&mut self) {
        self.cookies.clear();
    }

    pub(crate) fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Some(pairs.join("; "))
    }

    /// Applies one `Set-Cookie` header. Returns the cookie name when the jar changed.
    pub(crate) fn absorb_set_cookie(&mut self, header: &str) -> Option<String> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let expired = value.is_empty()
            || parts.any(|attribute| {
                let attribute = attribute.trim();
                attribute
                    .split_once('=')
                    .is_some_and(|(key, value)| {
                        key.trim().eq_ignore_ascii_case("max-age")
                            && value.trim().parse::<i64>().is_ok_and(|age| age <= 0)
                    })
            });

        if expired {
            return self.cookies.remove(name).map(|_| name.to_string());
        }
        if self.cookie(name) == Some(value) {
            return None;
        }
        self.cookies.insert(name.to_string(), value.to_string());
        Some(name.to_string())
    }
}
