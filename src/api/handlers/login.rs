//! Interactive login, second factor and logout.

use crate::{
    api::AppState,
    auth::{LoginOutcome, TotpOutcome},
};
use axum::{
    extract::Extension,
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use super::utils::{apply_set_cookie, cookie_header, extract_client_ip};

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LoginResponse {
    pub totp_pending: bool,
}

#[derive(Deserialize, Debug)]
pub struct TotpRequest {
    pub code: String,
}

pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let mut jar = state.engine.sessions().jar(cookie_header(&headers));
    let outcome = state
        .engine
        .login(
            &mut jar,
            &request.username,
            &request.password,
            extract_client_ip(&headers),
        )
        .await;

    let mut response_headers = HeaderMap::new();
    apply_set_cookie(&mut jar, &mut response_headers);

    match outcome {
        Ok(LoginOutcome::Success) => (
            StatusCode::OK,
            response_headers,
            Json(LoginResponse {
                totp_pending: false,
            }),
        )
            .into_response(),
        Ok(LoginOutcome::TotpRequired) => (
            StatusCode::OK,
            response_headers,
            Json(LoginResponse { totp_pending: true }),
        )
            .into_response(),
        Ok(LoginOutcome::Failed) => (StatusCode::UNAUTHORIZED, response_headers).into_response(),
        Ok(LoginOutcome::Locked { remaining_seconds }) => {
            too_many_requests(remaining_seconds, response_headers)
        }
        Err(err) => {
            error!("Failed to create session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn totp(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<TotpRequest>,
) -> Response {
    let mut jar = state.engine.sessions().jar(cookie_header(&headers));
    let outcome = state.engine.verify_totp(&mut jar, &request.code).await;

    let mut response_headers = HeaderMap::new();
    apply_set_cookie(&mut jar, &mut response_headers);

    match outcome {
        Ok(TotpOutcome::Success) => (StatusCode::OK, response_headers).into_response(),
        Ok(TotpOutcome::Invalid | TotpOutcome::NotPending) => {
            (StatusCode::UNAUTHORIZED, response_headers).into_response()
        }
        Ok(TotpOutcome::Locked { remaining_seconds }) => {
            too_many_requests(remaining_seconds, response_headers)
        }
        Err(err) => {
            error!("Failed to upgrade session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let mut jar = state.engine.sessions().jar(cookie_header(&headers));
    state.engine.logout(&mut jar);

    let mut response_headers = HeaderMap::new();
    apply_set_cookie(&mut jar, &mut response_headers);
    (StatusCode::NO_CONTENT, response_headers)
}

fn too_many_requests(remaining_seconds: u64, mut headers: HeaderMap) -> Response {
    headers.insert(RETRY_AFTER, HeaderValue::from(remaining_seconds));
    (StatusCode::TOO_MANY_REQUESTS, headers).into_response()
}
