//! Health check endpoint.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// Health check endpoint.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthcheck",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Returns a simple health status indicating the service is running and accepting requests.\n\n\
                   Supports both GET and HEAD methods for compatibility with various health check systems.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus, content_type = "application/json", example = json!({"status": "OK"}))
    )
)]
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "OK" })
}
