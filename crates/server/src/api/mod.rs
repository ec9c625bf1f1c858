//! HTTP surface.
//!
//! - `token` - OAuth2 token endpoint (/token)
//! - `jwks` - public signing keys (/.well-known/jwks.json)
//! - `health` - health check (/healthcheck)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod jwks;
pub mod openapi;
pub mod token;

pub use health::MISC_TAG;
pub use token::OAUTH2_TAG;

use crate::AppState;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Application router with OpenAPI docs under `/api-docs`.
pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .routes(routes!(token::token))
        .routes(routes!(jwks::jwks))
        .routes(routes!(health::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server on `0.0.0.0:<port>`.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: AppState, port: u16) -> color_eyre::Result<()> {
    let router = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{addr}");
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
