pub mod actions;
pub mod health;
pub mod sessions;

use crate::sessions::{ErrorKind, Session, SessionError, SessionManager};
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize, Debug)]
struct ErrorBody {
    error: &'static str,
}

/// Session token from `Authorization`, with or without a `Bearer` prefix.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UserNotFound | ErrorKind::PasswordMismatch | ErrorKind::SessionNotFound => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::UserLocked => StatusCode::LOCKED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn reject(status: StatusCode, message: &'static str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

/// Live session behind the request's token. Missing, expired and unreadable
/// sessions are all 401.
pub(crate) async fn authenticated(
    headers: &HeaderMap,
    manager: &SessionManager,
) -> Result<Session, Response> {
    let Some(token) = session_token(headers) else {
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "authentication token is missing",
        ));
    };
    match manager.validate(&token).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(error_response(&SessionError::SessionNotFound)),
        Err(err) if err.kind() == ErrorKind::MalformedRecord => {
            // an unreadable record cannot authenticate anyone
            warn!("rejecting malformed session: {err}");
            Err(StatusCode::UNAUTHORIZED.into_response())
        }
        Err(err) => Err(error_response(&err)),
    }
}

/// Map a session error onto a response; server-side failures are logged and
/// their details kept out of the body.
pub(crate) fn error_response(err: &SessionError) -> Response {
    let status = status_for(err.kind());
    let message = match err.kind() {
        ErrorKind::UserNotFound | ErrorKind::PasswordMismatch => "invalid credentials",
        ErrorKind::UserLocked => "account locked",
        ErrorKind::SessionNotFound => "session not found",
        _ => "internal error",
    };

    if status.is_server_error() {
        error!("session operation failed: {err}");
    } else {
        warn!("session request rejected: {err}");
    }

    reject(status, message)
}
