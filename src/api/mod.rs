//! HTTP API server for bakery.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! bakery serve --listen 0.0.0.0:8080
//!
//! # List bakeforms
//! curl http://localhost:8080/
//!
//! # Upload an image
//! curl -X POST --data-binary @raspios.img http://localhost:8080/raspios
//!
//! # Delete it again
//! curl -X DELETE http://localhost:8080/raspios
//! ```

pub mod body;
pub mod error;
pub mod handlers;
pub mod state;
pub mod types;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;

use state::ApiState;

/// OpenAPI description of the HTTP surface.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::bakeforms::list_bakeforms,
        handlers::bakeforms::upload_bakeform,
        handlers::bakeforms::delete_bakeform
    ),
    components(schemas(
        types::BakeformInfo,
        types::BakeformMap,
        types::HealthResponse,
        types::ApiErrorResponse
    )),
    tags(
        (name = "Bakeforms", description = "Disk image inventory"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;

/// GET /openapi.json
async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the API router with all endpoints.
///
/// `request_timeout` bounds each request; uploads reload the inventory, so it
/// must cover an image transfer plus a boot copy.
pub fn create_router(state: Arc<ApiState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi))
        .route("/", get(handlers::bakeforms::list_bakeforms))
        .route(
            "/:name",
            post(handlers::bakeforms::upload_bakeform).delete(handlers::bakeforms::delete_bakeform),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
