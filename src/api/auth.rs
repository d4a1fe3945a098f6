//! Purpose: Login / two-factor state machine over the transport.
//! Exports: `AuthSession`, `AuthState`, `AuthPhase`, `Credentials`, `LoginOutcome`,
//! `TwoFactorChallenge`, `TwoFactorMethod`.
//! Role: Sole owner of the `Session`; every authenticated call goes through `dispatch`.
//! Invariants: Bad credentials end in `Failed(InvalidCredentials)`, never `Authenticated`.
//! Invariants: `Authenticated` is only entered with a complete current-user payload.
//! Invariants: `Failed` is absorbing until `logout`.
//! Invariants: An `Unauthorized` response while authenticated demotes to `LoggedOut`
//! and the triggering error is still returned.
//! Invariants: The core never retries a login on its own.
#![allow(clippy::result_large_err)]

use super::config::{ClientConfig, TwoFactorPolicy};
use super::session::{AUTH_COOKIE, Session, TWO_FACTOR_COOKIE};
use super::transport::{Call, Transport};
use crate::core::error::{Error, ErrorKind};
use crate::core::payload::{EntityKind, RawPayload};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::fmt;
use std::time::Instant;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone)]
pub enum Credentials {
    Password { username: String, password: String },
    /// Pre-encoded `base64(username:password)`.
    Token(String),
    /// A previously persisted session, see [`Session::auth_token`].
    SessionCookie {
        auth: String,
        two_factor: Option<String>,
    },
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn session_cookie(auth: impl Into<String>, two_factor: Option<String>) -> Self {
        Self::SessionCookie {
            auth: auth.into(),
            two_factor,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::Token(_) => f.write_str("Token(..)"),
            Credentials::SessionCookie { .. } => f.write_str("SessionCookie(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthPhase {
    LoggedOut,
    AwaitingCredentialsCheck,
    AwaitingTwoFactor,
    Authenticated,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TwoFactorMethod {
    Totp,
    Otp,
    EmailOtp,
    Other(String),
}

impl TwoFactorMethod {
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "totp" => TwoFactorMethod::Totp,
            "otp" => TwoFactorMethod::Otp,
            "emailotp" => TwoFactorMethod::EmailOtp,
            other => TwoFactorMethod::Other(other.to_string()),
        }
    }

    /// Path segment of the matching `/auth/twofactorauth/<method>/verify` endpoint.
    pub fn as_str(&self) -> &str {
        match self {
            TwoFactorMethod::Totp => "totp",
            TwoFactorMethod::Otp => "otp",
            TwoFactorMethod::EmailOtp => "emailotp",
            TwoFactorMethod::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TwoFactorChallenge {
    methods: Vec<TwoFactorMethod>,
    issued_at: Instant,
    attempts_left: u32,
}

impl TwoFactorChallenge {
    fn new(methods: Vec<TwoFactorMethod>, policy: &TwoFactorPolicy) -> Self {
        let methods = if methods.is_empty() {
            vec![TwoFactorMethod::Totp, TwoFactorMethod::Otp]
        } else {
            methods
        };
        Self {
            methods,
            issued_at: Instant::now(),
            attempts_left: policy.max_attempts.max(1),
        }
    }

    pub fn methods(&self) -> &[TwoFactorMethod] {
        &self.methods
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }

    pub fn offers(&self, method: &TwoFactorMethod) -> bool {
        self.methods.contains(method)
    }

    /// Six digits go to an authenticator/email endpoint; anything else is a recovery code.
    fn method_for(&self, code: &str) -> TwoFactorMethod {
        let six_digits = code.len() == 6 && code.bytes().all(|byte| byte.is_ascii_digit());
        if !six_digits {
            return TwoFactorMethod::Otp;
        }
        if !self.offers(&TwoFactorMethod::Totp) && self.offers(&TwoFactorMethod::EmailOtp) {
            TwoFactorMethod::EmailOtp
        } else {
            TwoFactorMethod::Totp
        }
    }
}

#[derive(Clone, Debug)]
pub enum AuthState {
    LoggedOut,
    AwaitingCredentialsCheck,
    AwaitingTwoFactor(TwoFactorChallenge),
    Authenticated,
    Failed(ErrorKind),
}

impl AuthState {
    pub fn phase(&self) -> AuthPhase {
        match self {
            AuthState::LoggedOut => AuthPhase::LoggedOut,
            AuthState::AwaitingCredentialsCheck => AuthPhase::AwaitingCredentialsCheck,
            AuthState::AwaitingTwoFactor(_) => AuthPhase::AwaitingTwoFactor,
            AuthState::Authenticated => AuthPhase::Authenticated,
            AuthState::Failed(_) => AuthPhase::Failed,
        }
    }
}

#[derive(Clone, Debug)]
pub enum LoginOutcome {
    /// Logged in; carries the current-user payload the server returned.
    Authenticated(RawPayload),
    TwoFactorRequired(TwoFactorChallenge),
}

pub struct AuthSession {
    state: AuthState,
    session: Session,
    policy: TwoFactorPolicy,
    fetch_api_key: bool,
    history: Vec<AuthPhase>,
}

impl AuthSession {
    pub fn new(config: &ClientConfig) -> Self {
        let mut session = Session::new();
        if let Some(api_key) = &config.api_key {
            session.set_api_key(api_key.clone());
        }
        Self {
            state: AuthState::LoggedOut,
            session,
            policy: config.two_factor.clone(),
            fetch_api_key: config.fetch_api_key,
            history: vec![AuthPhase::LoggedOut],
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn phase(&self) -> AuthPhase {
        self.state.phase()
    }

    /// Phases entered since the last `login` began, starting with the phase it began in.
    pub fn history(&self) -> &[AuthPhase] {
        &self.history
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    pub fn login(
        &mut self,
        transport: &Transport,
        credentials: Credentials,
    ) -> ApiResult<LoginOutcome> {
        match &self.state {
            AuthState::Authenticated => {
                return Err(Error::new(ErrorKind::Usage).with_message("already logged in"));
            }
            AuthState::Failed(kind) => return Err(failed_error(*kind)),
            AuthState::AwaitingCredentialsCheck => {
                return Err(Error::new(ErrorKind::Usage).with_message("login already in progress"));
            }
            AuthState::LoggedOut | AuthState::AwaitingTwoFactor(_) => {}
        }

        self.history = vec![self.phase()];
        self.transition(AuthState::AwaitingCredentialsCheck);
        self.session.clear();
        if let Err(err) = self.ensure_api_key(transport) {
            self.transition(AuthState::LoggedOut);
            return Err(err);
        }

        let call = match credentials {
            Credentials::Password { username, password } => {
                let token = BASE64.encode(format!("{username}:{password}"));
                Call::get(["auth", "user"]).header("Authorization", format!("Basic {token}"))
            }
            Credentials::Token(token) => {
                Call::get(["auth", "user"]).header("Authorization", format!("Basic {token}"))
            }
            Credentials::SessionCookie { auth, two_factor } => {
                self.session.set_cookie(AUTH_COOKIE, auth);
                if let Some(two_factor) = two_factor {
                    self.session.set_cookie(TWO_FACTOR_COOKIE, two_factor);
                }
                Call::get(["auth", "user"])
            }
        };

        match transport.execute(&mut self.session, &call) {
            Ok(value) => {
                let payload = match RawPayload::from_value(value) {
                    Ok(payload) => payload,
                    Err(err) => return Err(self.abandon_login(err)),
                };
                if let Some(methods) = requested_two_factor(&payload) {
                    return Ok(self.begin_two_factor(methods));
                }
                if let Err(err) = payload.require(EntityKind::User) {
                    return Err(self.abandon_login(err));
                }
                self.transition(AuthState::Authenticated);
                Ok(LoginOutcome::Authenticated(payload))
            }
            Err(err) if err.kind() == ErrorKind::Unauthorized => {
                if err.message().is_some_and(mentions_two_factor) {
                    return Ok(self.begin_two_factor(Vec::new()));
                }
                self.session.clear();
                self.transition(AuthState::Failed(ErrorKind::InvalidCredentials));
                Err(err.with_kind(ErrorKind::InvalidCredentials))
            }
            Err(err) => Err(self.abandon_login(err)),
        }
    }

    pub fn verify_two_factor(&mut self, transport: &Transport, code: &str) -> ApiResult<()> {
        let challenge = match &self.state {
            AuthState::AwaitingTwoFactor(challenge) => challenge.clone(),
            _ => {
                return Err(Error::new(ErrorKind::NotAuthenticated)
                    .with_message("no two-factor challenge is pending"));
            }
        };
        if challenge.issued_at.elapsed() > self.policy.challenge_ttl {
            self.session.clear();
            self.transition(AuthState::Failed(ErrorKind::ChallengeExpired));
            return Err(Error::new(ErrorKind::ChallengeExpired)
                .with_message("two-factor challenge expired"));
        }

        let code: String = code.chars().filter(|ch| !ch.is_whitespace()).collect();
        if code.is_empty() {
            return Err(
                Error::new(ErrorKind::InvalidCode).with_message("two-factor code is empty")
            );
        }
        let method = challenge.method_for(&code);
        let call = Call::post(["auth", "twofactorauth", method.as_str(), "verify"])
            .json(json!({ "code": code }));

        match transport.execute(&mut self.session, &call) {
            Ok(value) if value.get("verified").and_then(Value::as_bool) == Some(true) => {
                self.transition(AuthState::Authenticated);
                Ok(())
            }
            Ok(_) => Err(self.reject_code(challenge)),
            Err(err) if err.kind() == ErrorKind::BadRequest => Err(self.reject_code(challenge)),
            Err(err) if err.kind() == ErrorKind::Unauthorized => {
                self.session.clear();
                self.transition(AuthState::Failed(ErrorKind::ChallengeExpired));
                Err(err.with_kind(ErrorKind::ChallengeExpired))
            }
            Err(err) => Err(err),
        }
    }

    pub fn ensure_authenticated(&self) -> ApiResult<()> {
        match &self.state {
            AuthState::Authenticated => Ok(()),
            AuthState::Failed(kind) => Err(failed_error(*kind)),
            AuthState::AwaitingTwoFactor(_) => Err(Error::new(ErrorKind::NotAuthenticated)
                .with_message("two-factor verification is pending")),
            AuthState::LoggedOut | AuthState::AwaitingCredentialsCheck => {
                Err(Error::new(ErrorKind::NotAuthenticated).with_message("not logged in"))
            }
        }
    }

    /// Runs an authenticated call; an `Unauthorized` answer logs the session out.
    pub fn dispatch(&mut self, transport: &Transport, call: &Call) -> ApiResult<Value> {
        self.ensure_authenticated()?;
        match transport.execute(&mut self.session, call) {
            Err(err) if err.kind() == ErrorKind::Unauthorized => {
                self.demote();
                Err(err)
            }
            result => result,
        }
    }

    /// Ends the session from any state. A failed server-side logout is reported
    /// after the local session has already been cleared.
    pub fn logout(&mut self, transport: &Transport) -> ApiResult<()> {
        let result = if self.is_authenticated() {
            transport
                .execute(&mut self.session, &Call::put(["logout"]))
                .map(|_| ())
        } else {
            Ok(())
        };
        self.session.clear();
        if self.phase() != AuthPhase::LoggedOut {
            self.transition(AuthState::LoggedOut);
        }
        match result {
            Err(err) if err.kind() == ErrorKind::Unauthorized => Ok(()),
            result => result,
        }
    }

    fn demote(&mut self) {
        tracing::warn!("session rejected by server; logging out");
        self.session.clear();
        self.transition(AuthState::LoggedOut);
    }

    /// Drops a login attempt that cannot complete; the caller may try again.
    fn abandon_login(&mut self, err: Error) -> Error {
        self.session.clear();
        self.transition(AuthState::LoggedOut);
        err
    }

    fn begin_two_factor(&mut self, methods: Vec<TwoFactorMethod>) -> LoginOutcome {
        let challenge = TwoFactorChallenge::new(methods, &self.policy);
        self.transition(AuthState::AwaitingTwoFactor(challenge.clone()));
        LoginOutcome::TwoFactorRequired(challenge)
    }

    fn reject_code(&mut self, mut challenge: TwoFactorChallenge) -> Error {
        challenge.attempts_left = challenge.attempts_left.saturating_sub(1);
        if challenge.attempts_left == 0 {
            self.session.clear();
            self.transition(AuthState::Failed(ErrorKind::InvalidCode));
            return Error::new(ErrorKind::InvalidCode)
                .with_message("two-factor code rejected; no attempts left");
        }
        let attempts_left = challenge.attempts_left;
        self.state = AuthState::AwaitingTwoFactor(challenge);
        Error::new(ErrorKind::InvalidCode).with_message(format!(
            "two-factor code rejected; {attempts_left} attempts left"
        ))
    }

    fn ensure_api_key(&mut self, transport: &Transport) -> ApiResult<()> {
        if self.session.api_key().is_some() || !self.fetch_api_key {
            return Ok(());
        }
        let config = transport.execute(&mut self.session, &Call::get(["config"]))?;
        let api_key = config
            .get("apiKey")
            .or_else(|| config.get("clientApiKey"))
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::new(ErrorKind::OutOfDate)
                    .with_message("remote config no longer carries an api key")
                    .with_path("/config")
            })?;
        self.session.set_api_key(api_key);
        Ok(())
    }

    fn transition(&mut self, next: AuthState) {
        let from = self.phase();
        let to = next.phase();
        self.state = next;
        self.history.push(to);
        tracing::debug!(from = ?from, to = ?to, "auth state changed");
    }
}

fn failed_error(kind: ErrorKind) -> Error {
    Error::new(kind).with_message("authentication failed; log out before trying again")
}

fn requested_two_factor(payload: &RawPayload) -> Option<Vec<TwoFactorMethod>> {
    match payload.get("requiresTwoFactorAuth")? {
        Value::Array(methods) => Some(
            methods
                .iter()
                .filter_map(Value::as_str)
                .map(TwoFactorMethod::from_wire)
                .collect(),
        ),
        Value::Bool(true) => Some(Vec::new()),
        _ => None,
    }
}

fn mentions_two_factor(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("two-factor")
        || message.contains("requirestwofactorauth")
        || message.contains("2fa")
}
