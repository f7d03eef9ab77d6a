pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::catalog::ProjectCatalog;
use crate::services::pipeline::ConversionPipeline;
use crate::services::storage::StorageService;
use crate::api::middleware::request_id::REQUEST_ID_HEADER;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::projects::upload_project_files,
        api::handlers::projects::list_projects,
        api::handlers::projects::add_project,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::projects::FileOutcomeResponse,
            api::handlers::projects::ProjectResponse,
            api::handlers::projects::AddProjectResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "projects", description = "Terrain upload and project listing endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub catalog: Arc<dyn ProjectCatalog>,
    pub pipeline: Arc<ConversionPipeline>,
    pub config: PipelineConfig,
}

pub fn create_app(state: AppState) -> Router {
    // Room for multipart boundaries and headers on top of the file itself
    let body_limit = state.config.max_file_size + 10 * 1024 * 1024;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/projects",
            get(api::handlers::projects::list_projects).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/projects/upload",
            post(api::handlers::projects::upload_project_files)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/projects/add",
            get(api::handlers::projects::add_project).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::optional_auth_middleware,
            )),
        )
        // Added before the request id layer so it runs after it
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_request(|request: &Request<Body>, _span: &Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(|response: &Response<Body>, latency: Duration, _span: &Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                }),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}

fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}
