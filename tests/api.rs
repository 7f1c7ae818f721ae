use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE},
        Request, Response, StatusCode,
    },
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tollgate::{
    api::{self, AppState},
    auth::{AuthConfig, AuthEngine, CredentialStore, PolicySet, User},
};
use tower::ServiceExt;

const CLIENT_IP: &str = "203.0.113.7";

fn app() -> Result<Router> {
    let config = AuthConfig::new(
        SecretString::from("h".repeat(32)),
        SecretString::from("e".repeat(32)),
    )
    .with_cookie_domain("example.com".to_string())
    .with_login_max_retries(3)
    .with_login_timeout_seconds(60);

    let users = vec![
        User {
            username: "alice".to_string(),
            password_hash: bcrypt::hash("wonderland", 4)?,
            totp_secret: None,
        },
        User {
            username: "carol".to_string(),
            password_hash: bcrypt::hash("secure", 4)?,
            totp_secret: Some(SecretString::from(
                "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string(),
            )),
        },
    ];

    let policies = PolicySet::from_json(
        r#"{
            "default": { "user_whitelist": "alice,carol" },
            "hosts": {
                "wiki": { "allowed_uri_pattern": "^/public/" },
                "admin": { "ip": { "allow": ["10.0.0.0/8"] } }
            }
        }"#,
    )?;

    let engine = AuthEngine::new(config, CredentialStore::new(users, None));
    Ok(api::router(Arc::new(AppState::new(engine, policies))))
}

fn login_request(username: &str, password: &str) -> Result<Request<Body>> {
    let body = json!({ "username": username, "password": password }).to_string();
    Ok(Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::from(body))?)
}

fn forward_request(host: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .uri("/api/auth/forward")
        .header("x-forwarded-host", host)
        .header("x-forwarded-uri", uri)
        .header("x-forwarded-for", CLIENT_IP)
}

/// `name=value` part of the response's `Set-Cookie`.
fn session_cookie(response: &Response<Body>) -> Result<String> {
    let header = response
        .headers()
        .get(SET_COOKIE)
        .context("missing set-cookie")?
        .to_str()?;
    Ok(header.split(';').next().unwrap_or_default().to_string())
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn health_reports_build() -> Result<()> {
    let response = app()?
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await?;
    assert_eq!(body["name"], "tollgate");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn forward_without_credentials_is_unauthorized() -> Result<()> {
    let response = app()?
        .oneshot(forward_request("app.example.com", "/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn login_then_forward_with_cookie() -> Result<()> {
    let app = app()?;

    let response = app
        .clone()
        .oneshot(login_request("alice", "wonderland")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response)?;
    assert!(cookie.starts_with("tollgate_session=v1."));
    assert_eq!(json_body(response).await?, json!({ "totp_pending": false }));

    let response = app
        .oneshot(
            forward_request("app.example.com", "/dashboard")
                .header(COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "remote-user"), Some("alice"));
    assert_eq!(header(&response, "remote-email"), Some("alice@example.com"));
    assert_eq!(header(&response, "remote-name"), Some("Alice"));
    Ok(())
}

#[tokio::test]
async fn wrong_password_then_lockout() -> Result<()> {
    let app = app()?;

    for _ in 0..3 {
        let response = app.clone().oneshot(login_request("alice", "nope")?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    let response = app.oneshot(login_request("alice", "wonderland")?).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = header(&response, RETRY_AFTER.as_str())
        .context("missing retry-after")?
        .parse()?;
    assert!(retry_after > 0 && retry_after <= 60);
    Ok(())
}

#[tokio::test]
async fn failed_login_clears_stale_cookie() -> Result<()> {
    let app = app()?;

    let mut request = login_request("alice", "nope")?;
    request.headers_mut().insert(
        COOKIE,
        "tollgate_session=v1.AAAAAAAAAAAAAAAAAAAAAAAAAAAA".parse()?,
    );
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(header(&response, SET_COOKIE.as_str()).is_some_and(|c| c.contains("Max-Age=0")));

    for _ in 0..2 {
        app.clone().oneshot(login_request("alice", "nope")?).await?;
    }

    let mut request = login_request("alice", "wonderland")?;
    request.headers_mut().insert(
        COOKIE,
        "tollgate_session=v1.AAAAAAAAAAAAAAAAAAAAAAAAAAAA".parse()?,
    );
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(RETRY_AFTER));
    assert!(header(&response, SET_COOKIE.as_str()).is_some_and(|c| c.contains("Max-Age=0")));
    Ok(())
}

#[tokio::test]
async fn basic_auth_does_not_issue_cookie() -> Result<()> {
    let credentials = STANDARD.encode("alice:wonderland");
    let response = app()?
        .oneshot(
            forward_request("app.example.com", "/")
                .header(AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "remote-user"), Some("alice"));
    assert!(response.headers().get(SET_COOKIE).is_none());
    Ok(())
}

#[tokio::test]
async fn ip_allow_list_denies_others() -> Result<()> {
    let credentials = STANDARD.encode("alice:wonderland");
    let response = app()?
        .oneshot(
            forward_request("admin.example.com", "/")
                .header(AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn bypass_pattern_skips_auth() -> Result<()> {
    let app = app()?;

    let response = app
        .clone()
        .oneshot(forward_request("wiki.example.com", "/public/page").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("remote-user").is_none());

    let response = app
        .oneshot(forward_request("wiki.example.com", "/private").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn pending_totp_session_is_not_authenticated() -> Result<()> {
    let app = app()?;

    let response = app.clone().oneshot(login_request("carol", "secure")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response)?;
    assert_eq!(json_body(response).await?, json!({ "totp_pending": true }));

    let response = app
        .clone()
        .oneshot(
            forward_request("app.example.com", "/")
                .header(COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/totp")
                .header(CONTENT_TYPE, "application/json")
                .header(COOKIE, &cookie)
                .body(Body::from(json!({ "code": "000000" }).to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie() -> Result<()> {
    let app = app()?;
    let response = app
        .clone()
        .oneshot(login_request("alice", "wonderland")?)
        .await?;
    let cookie = session_cookie(&response)?;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/logout")
                .header(COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = header(&response, SET_COOKIE.as_str()).context("missing set-cookie")?;
    assert!(cleared.starts_with("tollgate_session=;"));
    assert!(cleared.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn tampered_cookie_is_cleared() -> Result<()> {
    let response = app()?
        .oneshot(
            forward_request("app.example.com", "/")
                .header(COOKIE, "tollgate_session=v1.AAAAAAAAAAAAAAAAAAAAAAAAAAAA")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(header(&response, SET_COOKIE.as_str()).is_some_and(|c| c.contains("Max-Age=0")));
    Ok(())
}
