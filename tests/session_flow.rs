//! Purpose: Login, two-factor and logout behavior of the client session.
//! Exports: None (integration test module).
//! Role: Drives `Client` against a scripted exchange and checks state transitions.
//! Invariants: No test touches the network.

mod support;

use serde_json::json;
use std::time::Duration;
use support::{
    API_KEY, Reply, ScriptedExchange, TestResult, client, config, init_tracing, logged_in,
    user_json,
};
use vrcapi::api::{
    AuthPhase, AuthState, Client, Credentials, EntityProxy, ErrorKind, LoginOutcome, Method,
    TwoFactorMethod, TwoFactorPolicy,
};

fn script_two_factor(exchange: &ScriptedExchange) {
    exchange.on_fn(Method::Get, "/auth/user", |request| {
        let verified = request
            .header("Cookie")
            .is_some_and(|cookie| cookie.contains("twoFactorAuth=tfa_1"));
        if verified {
            Reply::ok(user_json("usr_me", "Me"))
        } else {
            Reply::ok(json!({"requiresTwoFactorAuth": ["totp", "otp"]}))
                .with_cookie("auth=pending_1; Path=/; HttpOnly")
        }
    });
    exchange.on_fn(Method::Post, "/auth/twofactorauth/totp/verify", |request| {
        let correct = request
            .body
            .as_deref()
            .is_some_and(|body| body.contains("\"123456\""));
        if correct {
            Reply::ok(json!({"verified": true})).with_cookie("twoFactorAuth=tfa_1; Path=/")
        } else {
            Reply::error(400, "Invalid Code")
        }
    });
}

#[test]
fn login_without_two_factor_authenticates() -> TestResult {
    init_tracing();
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::ok(user_json("usr_me", "Me")).with_cookie("auth=authcookie_1; Path=/")],
    );
    exchange.on(
        Method::Get,
        "/users/usr_1",
        vec![Reply::ok(user_json("usr_1", "One"))],
    );
    let mut client = client(&exchange);

    let outcome = client.login(Credentials::password("me", "pw"))?;
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    assert_eq!(
        client.auth_history(),
        &[
            AuthPhase::LoggedOut,
            AuthPhase::AwaitingCredentialsCheck,
            AuthPhase::Authenticated
        ]
    );
    assert_eq!(client.session().auth_token(), Some("authcookie_1"));
    assert_eq!(client.current_user_id(), Some("usr_me"));

    let login = exchange
        .last(Method::Get, "/auth/user")
        .expect("login request");
    assert_eq!(login.header("Authorization"), Some("Basic bWU6cHc="));
    assert_eq!(login.query("apiKey").as_deref(), Some(API_KEY));

    let first = client.get_user("usr_1")?;
    let second = client.get_user("usr_1")?;
    assert_eq!(first.id(), "usr_1");
    assert!(first.same_entity(&second));

    let fetch = exchange
        .last(Method::Get, "/users/usr_1")
        .expect("user request");
    assert_eq!(fetch.header("Cookie"), Some("auth=authcookie_1"));
    Ok(())
}

#[test]
fn wrong_code_keeps_challenge_then_right_code_authenticates() -> TestResult {
    let exchange = ScriptedExchange::new();
    script_two_factor(&exchange);
    let mut client = client(&exchange);

    let challenge = match client.login(Credentials::password("me", "pw"))? {
        LoginOutcome::TwoFactorRequired(challenge) => challenge,
        LoginOutcome::Authenticated(_) => return Err("expected a two-factor challenge".into()),
    };
    assert_eq!(
        challenge.methods(),
        &[TwoFactorMethod::Totp, TwoFactorMethod::Otp]
    );
    assert_eq!(client.auth_phase(), AuthPhase::AwaitingTwoFactor);
    assert_eq!(client.session().auth_token(), Some("pending_1"));

    let err = client
        .verify_two_factor("000000")
        .expect_err("wrong code");
    assert_eq!(err.kind(), ErrorKind::InvalidCode);
    match client.auth_state() {
        AuthState::AwaitingTwoFactor(challenge) => assert_eq!(challenge.attempts_left(), 2),
        other => return Err(format!("unexpected state {other:?}").into()),
    }

    client.verify_two_factor("123 456")?;
    assert_eq!(client.auth_phase(), AuthPhase::Authenticated);
    assert_eq!(client.session().two_factor_token(), Some("tfa_1"));

    let me = client.current_user()?;
    assert_eq!(me.display_name()?, "Me");
    Ok(())
}

#[test]
fn exhausted_codes_fail_until_logout() -> TestResult {
    let exchange = ScriptedExchange::new();
    script_two_factor(&exchange);
    let mut client = client(&exchange);
    client.login(Credentials::password("me", "pw"))?;

    for _ in 0..2 {
        let err = client.verify_two_factor("111111").expect_err("wrong");
        assert_eq!(err.kind(), ErrorKind::InvalidCode);
        assert_eq!(client.auth_phase(), AuthPhase::AwaitingTwoFactor);
    }
    let err = client.verify_two_factor("111111").expect_err("last");
    assert_eq!(err.kind(), ErrorKind::InvalidCode);
    assert!(matches!(
        client.auth_state(),
        AuthState::Failed(ErrorKind::InvalidCode)
    ));

    let err = client
        .login(Credentials::password("me", "pw"))
        .expect_err("failed is absorbing");
    assert_eq!(err.kind(), ErrorKind::InvalidCode);
    let err = client.get_user("usr_1").expect_err("still failed");
    assert_eq!(err.kind(), ErrorKind::InvalidCode);

    client.logout()?;
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(exchange.count(Method::Put, "/logout"), 0);
    assert!(matches!(
        client.login(Credentials::password("me", "pw"))?,
        LoginOutcome::TwoFactorRequired(_)
    ));
    Ok(())
}

#[test]
fn recovery_codes_use_the_otp_endpoint() -> TestResult {
    let exchange = ScriptedExchange::new();
    script_two_factor(&exchange);
    exchange.on(
        Method::Post,
        "/auth/twofactorauth/otp/verify",
        vec![Reply::ok(json!({"verified": true}))],
    );
    let mut client = client(&exchange);
    client.login(Credentials::password("me", "pw"))?;

    client.verify_two_factor("abcd-efgh")?;
    assert_eq!(client.auth_phase(), AuthPhase::Authenticated);
    assert_eq!(exchange.count(Method::Post, "/auth/twofactorauth/otp/verify"), 1);
    assert_eq!(exchange.count(Method::Post, "/auth/twofactorauth/totp/verify"), 0);
    Ok(())
}

#[test]
fn expired_challenge_fails_without_a_request() -> TestResult {
    let exchange = ScriptedExchange::new();
    script_two_factor(&exchange);
    let config = config().with_two_factor(
        TwoFactorPolicy::new().with_challenge_ttl(Duration::ZERO),
    );
    let mut client = Client::with_exchange(config, exchange.clone());
    client.login(Credentials::password("me", "pw"))?;
    std::thread::sleep(Duration::from_millis(5));

    let err = client.verify_two_factor("123456").expect_err("expired");
    assert_eq!(err.kind(), ErrorKind::ChallengeExpired);
    assert!(matches!(
        client.auth_state(),
        AuthState::Failed(ErrorKind::ChallengeExpired)
    ));
    assert_eq!(exchange.count(Method::Post, "/auth/twofactorauth/totp/verify"), 0);
    Ok(())
}

#[test]
fn bad_credentials_end_in_failed() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::error(401, "Invalid Username/Email or Password")],
    );
    let mut client = client(&exchange);

    let err = client
        .login(Credentials::password("me", "wrong"))
        .expect_err("bad credentials");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(err.message(), Some("Invalid Username/Email or Password"));
    assert!(matches!(
        client.auth_state(),
        AuthState::Failed(ErrorKind::InvalidCredentials)
    ));
    assert!(!client.auth_history().contains(&AuthPhase::Authenticated));
    assert_eq!(client.session().auth_token(), None);

    let err = client.current_user().expect_err("not authenticated");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    Ok(())
}

#[test]
fn two_factor_401_message_starts_a_challenge() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::error(401, "Requires Two-Factor Authentication")],
    );
    let mut client = client(&exchange);

    let outcome = client.login(Credentials::token("bWU6cHc="))?;
    assert!(matches!(outcome, LoginOutcome::TwoFactorRequired(_)));
    assert_eq!(client.auth_phase(), AuthPhase::AwaitingTwoFactor);
    let request = exchange.last(Method::Get, "/auth/user").expect("login");
    assert_eq!(request.header("Authorization"), Some("Basic bWU6cHc="));
    Ok(())
}

#[test]
fn unauthorized_response_demotes_session() -> TestResult {
    let exchange = ScriptedExchange::new();
    let (mut client, _me) = logged_in(&exchange)?;
    exchange.on(
        Method::Get,
        "/users/usr_1",
        vec![Reply::error(401, "Missing Credentials")],
    );

    let err = client.get_user("usr_1").expect_err("unauthorized");
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(client.session().auth_token(), None);
    assert_eq!(exchange.count(Method::Get, "/users/usr_1"), 1);

    let err = client.get_user("usr_1").expect_err("logged out");
    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
    assert_eq!(exchange.count(Method::Get, "/users/usr_1"), 1);
    Ok(())
}

#[test]
fn logout_calls_server_and_clears_state() -> TestResult {
    let exchange = ScriptedExchange::new();
    let (mut client, me) = logged_in(&exchange)?;
    exchange.on(
        Method::Put,
        "/logout",
        vec![Reply::ok(json!({"success": {"message": "Ok!", "status_code": 200}}))],
    );

    client.logout()?;
    assert_eq!(exchange.count(Method::Put, "/logout"), 1);
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(client.session().auth_token(), None);
    assert_eq!(client.current_user_id(), None);
    assert!(client.cache().is_empty());
    assert_eq!(me.display_name().expect_err("evicted").kind(), ErrorKind::CacheMiss);

    client.logout()?;
    assert_eq!(exchange.count(Method::Put, "/logout"), 1);
    Ok(())
}

#[test]
fn logout_failure_is_reported_after_clearing() -> TestResult {
    let exchange = ScriptedExchange::new();
    let (mut client, _me) = logged_in(&exchange)?;
    exchange.on(Method::Put, "/logout", vec![Reply::error(500, "boom")]);

    let err = client.logout().expect_err("server error");
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(client.session().auth_token(), None);
    Ok(())
}

#[test]
fn second_login_while_authenticated_is_a_usage_error() -> TestResult {
    let exchange = ScriptedExchange::new();
    let (mut client, _me) = logged_in(&exchange)?;
    let err = client
        .login(Credentials::password("me", "pw"))
        .expect_err("already logged in");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(client.auth_phase(), AuthPhase::Authenticated);
    Ok(())
}

#[test]
fn stored_session_cookie_resumes_without_basic_auth() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::ok(user_json("usr_me", "Me"))],
    );
    let mut client = client(&exchange);

    client.login(Credentials::session_cookie(
        "stored_auth",
        Some("stored_tfa".to_string()),
    ))?;
    let request = exchange.last(Method::Get, "/auth/user").expect("login");
    assert_eq!(request.header("Authorization"), None);
    assert_eq!(
        request.header("Cookie"),
        Some("auth=stored_auth; twoFactorAuth=stored_tfa")
    );
    assert_eq!(client.auth_phase(), AuthPhase::Authenticated);
    Ok(())
}

#[test]
fn api_key_is_bootstrapped_from_remote_config() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/config",
        vec![Reply::ok(json!({"apiKey": "boot-key", "clientApiKey": "boot-key"}))],
    );
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![Reply::ok(user_json("usr_me", "Me"))],
    );
    let config = vrcapi::api::ClientConfig::new()
        .with_base_url(support::BASE_URL)?
        .with_retry(vrcapi::api::RetryPolicy::immediate());
    let mut client = Client::with_exchange(config, exchange.clone());

    client.login(Credentials::password("me", "pw"))?;
    let config_request = exchange.last(Method::Get, "/config").expect("config");
    assert_eq!(config_request.query("apiKey"), None);
    let login = exchange.last(Method::Get, "/auth/user").expect("login");
    assert_eq!(login.query("apiKey").as_deref(), Some("boot-key"));
    assert_eq!(client.session().api_key(), Some("boot-key"));
    Ok(())
}

#[test]
fn config_without_api_key_is_out_of_date() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(Method::Get, "/config", vec![Reply::ok(json!({"features": {}}))]);
    let config = vrcapi::api::ClientConfig::new()
        .with_base_url(support::BASE_URL)?
        .with_retry(vrcapi::api::RetryPolicy::immediate());
    let mut client = Client::with_exchange(config, exchange.clone());

    let err = client
        .login(Credentials::password("me", "pw"))
        .expect_err("no api key");
    assert_eq!(err.kind(), ErrorKind::OutOfDate);
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(exchange.count(Method::Get, "/auth/user"), 0);
    Ok(())
}

#[test]
fn network_failure_during_login_returns_to_logged_out() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(Method::Get, "/auth/user", vec![Reply::NetworkError]);
    let mut client = client(&exchange);

    let err = client
        .login(Credentials::password("me", "pw"))
        .expect_err("network");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(exchange.count(Method::Get, "/auth/user"), 4);
    Ok(())
}

#[test]
fn incomplete_current_user_leaves_login_retryable() -> TestResult {
    let exchange = ScriptedExchange::new();
    exchange.on(
        Method::Get,
        "/auth/user",
        vec![
            Reply::ok(json!({"id": "usr_me", "username": "me"}))
                .with_cookie("auth=authcookie_1; Path=/"),
            Reply::ok(user_json("usr_me", "Me")).with_cookie("auth=authcookie_2; Path=/"),
        ],
    );
    let mut client = client(&exchange);

    let err = client
        .login(Credentials::password("me", "pw"))
        .expect_err("incomplete payload");
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert_eq!(client.auth_phase(), AuthPhase::LoggedOut);
    assert_eq!(client.session().auth_token(), None);
    assert_eq!(client.current_user_id(), None);
    assert!(client.cache().is_empty());

    let outcome = client.login(Credentials::password("me", "pw"))?;
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    assert_eq!(client.current_user_id(), Some("usr_me"));
    assert_eq!(client.session().auth_token(), Some("authcookie_2"));
    Ok(())
}

#[test]
fn network_failure_on_code_verification_is_not_retried() -> TestResult {
    let exchange = ScriptedExchange::new();
    script_two_factor(&exchange);
    exchange.on(
        Method::Post,
        "/auth/twofactorauth/totp/verify",
        vec![Reply::NetworkError],
    );
    let mut client = client(&exchange);
    client.login(Credentials::password("me", "pw"))?;

    let err = client.verify_two_factor("123456").expect_err("network");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(exchange.count(Method::Post, "/auth/twofactorauth/totp/verify"), 1);
    match client.auth_state() {
        AuthState::AwaitingTwoFactor(challenge) => assert_eq!(challenge.attempts_left(), 3),
        other => return Err(format!("unexpected state {other:?}").into()),
    }
    Ok(())
}
