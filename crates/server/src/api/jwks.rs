//! JSON Web Key Set publication.

use crate::AppState;
use crate::api::token::{ErrorResponse, OAUTH2_TAG, issuance_error_response};
use crate::keys::JwkSet;
use axum::{Json, extract::State, response::IntoResponse, response::Response};

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Key Set",
    summary = "Public keys for verifying issued tokens",
    description = "Returns the public half of the current signing key, tagged with its `kid`. \
                   The set is empty when tokens are signed with a symmetric (HS*) method.",
    responses(
        (status = 200, description = "Current key set", body = JwkSet),
        (status = 503, description = "Signing key is unavailable", body = ErrorResponse),
    )
)]
pub async fn jwks(State(state): State<AppState>) -> Response {
    match state.issuer.keys().public_jwks().await {
        Ok(set) => Json(set).into_response(),
        Err(e) => issuance_error_response(&e),
    }
}
