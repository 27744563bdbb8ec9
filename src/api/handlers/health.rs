use crate::{short_commit, GIT_COMMIT_HASH};
use axum::{
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

impl Health {
    fn current() -> Self {
        Self {
            commit: GIT_COMMIT_HASH.to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// `name:version:short-commit`
    fn x_app(&self) -> Option<HeaderValue> {
        let value = format!(
            "{}:{}:{}",
            self.name,
            self.version,
            short_commit(&self.commit)
        );
        HeaderValue::from_str(&value)
            .map_err(|err| debug!("invalid X-App header {value:?}: {err}"))
            .ok()
    }
}

/// Build identity of the running binary. `OPTIONS` gets the header only.
#[instrument]
pub async fn health(method: Method) -> Response {
    let health = Health::current();

    let mut headers = HeaderMap::new();
    if let Some(value) = health.x_app() {
        headers.insert("x-app", value);
    }

    if method == Method::GET {
        (StatusCode::OK, headers, Json(health)).into_response()
    } else {
        (StatusCode::OK, headers).into_response()
    }
}
