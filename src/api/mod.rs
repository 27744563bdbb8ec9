use crate::{
    api::handlers::{actions, health, sessions},
    intake::ActionIntake,
    sessions::SessionManager,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    routing::{delete, get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod handlers;

/// Build the router with every endpoint and the shared layers.
/// `/v1/actions` is only mounted when an intake is configured.
#[must_use]
pub fn router(manager: Arc<SessionManager>, intake: Option<Arc<ActionIntake>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health).options(health::health))
        .route(
            "/v1/sessions",
            get(sessions::show)
                .post(sessions::create)
                .put(sessions::refresh)
                .delete(sessions::delete),
        )
        .route("/v1/sessions/all", delete(sessions::delete_all));

    if let Some(intake) = intake {
        app = app
            .route("/v1/actions", post(actions::submit))
            .layer(Extension(intake));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(manager)),
    )
}

/// Serve the API on `port` until ctrl-c.
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    port: u16,
    manager: Arc<SessionManager>,
    intake: Option<Arc<ActionIntake>>,
) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, router(manager, intake).into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    // headers are left out, they carry session tokens
    debug_span!("http-request", method, path, request_id)
}
