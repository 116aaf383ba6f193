//! Axum Router Configuration
//!
//! The complete HTTP routing for the bridge: the webhook ingress, the
//! operational surface, and the OpenAPI documentation.

use crate::{
    handlers,
    handlers::{AcceptedResponse, ErrorResponse, EventBody, EventEnvelope, StatusResponse},
    state::AppState,
    supervisor::ConnectionState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::ingest_event,
        handlers::get_status,
        handlers::health,
    ),
    components(
        schemas(EventEnvelope, EventBody, AcceptedResponse, StatusResponse, ErrorResponse, ConnectionState)
    ),
    tags(
        (name = "voxbridge", description = "Session bridge ingress and connection monitoring")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/events", post(handlers::ingest_event))
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
