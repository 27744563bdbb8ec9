//! `POST /v1/actions`: record something an authenticated user did.

use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, instrument, warn};

use super::{authenticated, reject};
use crate::{intake::ActionIntake, sessions::SessionManager};

/// Store the JSON body and echo it back.
#[instrument(skip_all)]
pub async fn submit(
    headers: HeaderMap,
    manager: Extension<Arc<SessionManager>>,
    intake: Extension<Arc<ActionIntake>>,
    body: Bytes,
) -> Response {
    let session = match authenticated(&headers, &manager).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match intake.submit(session.user_id, &body).await {
        Ok(_) => (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) if err.is_rejected_payload() => {
            warn!(user_id = session.user_id, "action rejected: {err}");
            reject(
                StatusCode::BAD_REQUEST,
                "body must be a JSON object or array",
            )
        }
        Err(err) => {
            error!(user_id = session.user_id, "action not stored: {err}");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
