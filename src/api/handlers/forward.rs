//! Forward-auth endpoint queried by the reverse proxy for every request.
//!
//! The proxy sends the original request's cookies and `Authorization` header
//! along with `X-Forwarded-Host`, `X-Forwarded-Uri` and the client address. A
//! `200` lets the request through and carries the identity in `Remote-*`
//! headers; `401` and `403` are passed back to the client.

use crate::{
    api::AppState,
    auth::{Decision, ForwardRequest, RequestIdentity},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::debug;

use super::utils::{
    apply_set_cookie, basic_credentials, cookie_header, extract_client_ip, header_str,
};

pub async fn forward(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let host = header_str(&headers, "x-forwarded-host").unwrap_or_default();
    let request = ForwardRequest {
        uri: header_str(&headers, "x-forwarded-uri")
            .unwrap_or("/")
            .to_string(),
        client_ip: extract_client_ip(&headers),
        basic: basic_credentials(&headers),
    };

    let policy = state.policies.for_host(host);
    let mut jar = state.engine.sessions().jar(cookie_header(&headers));
    let decision = state.engine.authorize(&mut jar, &request, policy).await;

    let mut response_headers = HeaderMap::new();
    apply_set_cookie(&mut jar, &mut response_headers);

    match decision {
        Decision::Allow { identity } => {
            if let Some(identity) = identity {
                insert_identity(&mut response_headers, &identity);
            }
            (StatusCode::OK, response_headers)
        }
        Decision::Unauthorized => (StatusCode::UNAUTHORIZED, response_headers),
        Decision::Forbidden { reason } => {
            debug!(host, %reason, "Forward auth denied");
            (StatusCode::FORBIDDEN, response_headers)
        }
    }
}

fn insert_identity(headers: &mut HeaderMap, identity: &RequestIdentity) {
    let fields = [
        ("remote-user", identity.username.as_str()),
        ("remote-email", identity.email.as_str()),
        ("remote-name", identity.display_name.as_str()),
        ("remote-groups", identity.oauth_groups.as_str()),
    ];
    for (name, value) in fields {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}
