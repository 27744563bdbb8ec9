//! Session endpoints. The token travels in `Authorization` for everything
//! except login.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

use super::{authenticated, error_response, session_token};
use crate::sessions::{LoginRequest, SessionError, SessionManager};

const CREATE_ATTEMPTS: u32 = 3;

#[derive(Deserialize)]
pub struct CreateSession {
    pub username: String,
    pub password: String,
    pub system_code: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedSession {
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeletedSessions {
    pub deleted: usize,
}

/// Log in; a token collision is retried with a fresh nonce.
#[instrument(skip(manager, payload), fields(username = %payload.username))]
pub async fn create(
    manager: Extension<Arc<SessionManager>>,
    Json(payload): Json<CreateSession>,
) -> impl IntoResponse {
    let request = LoginRequest {
        username: payload.username,
        password: SecretString::from(payload.password),
        tenant_code: payload.system_code,
    };

    let mut attempt = 1;
    loop {
        match manager.create(&request).await {
            Ok(token) => {
                return (StatusCode::CREATED, Json(CreatedSession { token })).into_response();
            }
            Err(SessionError::NonUniqueToken) if attempt < CREATE_ATTEMPTS => {
                warn!(attempt, "token collision, retrying");
                attempt += 1;
            }
            Err(err) => return error_response(&err),
        }
    }
}

#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    manager: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    let Some(token) = session_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match manager.refresh(&token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

/// Log out; missing or unknown tokens still get 204.
#[instrument(skip_all)]
pub async fn delete(
    headers: HeaderMap,
    manager: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    let Some(token) = session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match manager.delete(&token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

/// Log out every session of the token's owner.
#[instrument(skip_all)]
pub async fn delete_all(
    headers: HeaderMap,
    manager: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    let Some(token) = session_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match manager.find_and_delete_all_by_token(&token).await {
        Ok(deleted) => (StatusCode::OK, Json(DeletedSessions { deleted })).into_response(),
        Err(err) => error_response(&err),
    }
}

#[instrument(skip_all)]
pub async fn show(
    headers: HeaderMap,
    manager: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    match authenticated(&headers, &manager).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(response) => response,
    }
}
