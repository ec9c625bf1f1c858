//! OAuth2 token endpoint.
//!
//! Only the `password` and `refresh_token` grants are served. Clients are
//! the statically configured ones and authenticate with HTTP Basic or form
//! fields.

use crate::AppState;
use crate::error::IssuanceError;
use crate::scope::has_scope;
use crate::token::{IssueRequest, IssuedTokens, RefreshGrant, Subject, within_deadline};
use axum::{
    Form, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, warn};
use utoipa::ToSchema;

/// Tag for OpenAPI documentation.
pub const OAUTH2_TAG: &str = "OAuth2";

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

fn oauth_error(status: StatusCode, error: &str, description: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            error_description: description,
        }),
    )
        .into_response()
}

/// Map an issuance failure onto an OAuth2 error response.
pub fn issuance_error_response(e: &IssuanceError) -> Response {
    match e {
        // The deployment cannot serve this grant at all.
        IssuanceError::ConfigMissing(_) => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            Some(e.to_string()),
        ),
        IssuanceError::ScopeDenied(_) => {
            oauth_error(StatusCode::BAD_REQUEST, "invalid_scope", Some(e.to_string()))
        }
        IssuanceError::TokenExpired | IssuanceError::InvalidToken(_) => {
            oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", Some(e.to_string()))
        }
        IssuanceError::KeyUnavailable(_) | IssuanceError::DeadlineExceeded(_) => {
            warn!(error = %e, "token service temporarily unavailable");
            oauth_error(StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable", None)
        }
        _ => {
            error!(error = %e, "token issuance failed");
            oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
        }
    }
}

#[tracing::instrument(skip(state, headers, params), fields(grant_type = %params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Issue tokens for a password or refresh_token grant",
    description = "Authenticates the resource owner against the identity provider (password grant) \
                   or redeems a refresh token, then issues a signed JWT access token.\n\n\
                   **Supported grant types:**\n\
                   - `password`: `username` and `password` are checked against the identity provider\n\
                   - `refresh_token`: single-use; the scope may only be narrowed\n\n\
                   When `openid` is granted an `id_token` is returned next to the access token.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid grant, scope or request", body = ErrorResponse),
        (status = 401, description = "Unknown client or wrong secret", body = ErrorResponse),
        (status = 503, description = "Signing key or upstream service unavailable", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Response {
    let (client_id, client_secret) = extract_client_credentials(&headers, &params);
    let Some(client_id) = client_id else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            Some("client_id is required".to_string()),
        );
    };
    match state.config.client(&client_id) {
        Some(client) if Some(client.secret.as_str()) == client_secret.as_deref() => {}
        _ => return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", None),
    }

    match params.grant_type.as_str() {
        "password" => handle_password_grant(&state, client_id, params).await,
        "refresh_token" => handle_refresh_token_grant(&state, client_id, params).await,
        _ => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", None),
    }
}

fn extract_client_credentials(
    headers: &HeaderMap,
    params: &TokenRequest,
) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth)
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        return (Some(id.to_string()), Some(secret.to_string()));
    }

    (params.client_id.clone(), params.client_secret.clone())
}

async fn handle_password_grant(state: &AppState, client_id: String, params: TokenRequest) -> Response {
    let authenticator = match state.password_authenticator() {
        Ok(authenticator) => authenticator,
        Err(e) => return issuance_error_response(&e),
    };
    let (Some(username), Some(password)) = (params.username, params.password) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            Some("username and password are required".to_string()),
        );
    };

    // One budget covers authentication and issuance.
    let deadline = Duration::from_secs(state.config.issuance_deadline);
    let started = Instant::now();
    let user_id =
        match within_deadline(deadline, authenticator.authenticate(&username, &password)).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    Some("invalid username or password".to_string()),
                );
            }
            Err(e) => return issuance_error_response(&e),
        };

    let remaining = deadline.saturating_sub(started.elapsed());
    match issue(state, &client_id, user_id, params.scope.unwrap_or_default(), remaining).await {
        Ok(tokens) => token_response(state, &client_id, tokens),
        Err(e) => issuance_error_response(&e),
    }
}

async fn handle_refresh_token_grant(
    state: &AppState,
    client_id: String,
    params: TokenRequest,
) -> Response {
    let Some(refresh_token) = params.refresh_token else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            Some("refresh_token is required".to_string()),
        );
    };
    let Some(redemption) = state.refresh_tokens.redeem(&refresh_token) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", None);
    };
    let grant = redemption.grant().clone();
    if grant.client_id != client_id {
        state.refresh_tokens.restore(redemption);
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", None);
    }

    // A refreshed token may narrow the original scope but never widen it.
    let scope = match params.scope {
        Some(requested) => {
            if let Some(extra) = requested
                .split_whitespace()
                .find(|s| !has_scope(&grant.scope, s))
            {
                let description = format!("scope {extra} was not originally granted");
                state.refresh_tokens.restore(redemption);
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_scope", Some(description));
            }
            requested
        }
        None => grant.scope,
    };

    let deadline = Duration::from_secs(state.config.issuance_deadline);
    match issue(state, &client_id, grant.user_id, scope, deadline).await {
        Ok(tokens) => token_response(state, &client_id, tokens),
        Err(e) => {
            // Only a successful exchange consumes the token.
            state.refresh_tokens.restore(redemption);
            issuance_error_response(&e)
        }
    }
}

async fn issue(
    state: &AppState,
    client_id: &str,
    user_id: String,
    scope: String,
    deadline: Duration,
) -> Result<IssuedTokens, IssuanceError> {
    let request = IssueRequest::new(
        client_id,
        Subject::UserId(user_id),
        scope,
        Duration::from_secs(state.config.access_token_expire_in),
    )
    .with_refresh()
    .with_deadline(deadline);
    state.issuer.issue(&request).await
}

fn token_response(state: &AppState, client_id: &str, tokens: IssuedTokens) -> Response {
    remember_refresh_token(state, client_id, &tokens);
    Json(TokenResponse {
        access_token: tokens.access_token,
        token_type: "Bearer".to_string(),
        expires_in: tokens.expires_in,
        refresh_token: tokens.refresh_token,
        scope: tokens.scope,
        id_token: tokens.id_token,
    })
    .into_response()
}

fn remember_refresh_token(state: &AppState, client_id: &str, tokens: &IssuedTokens) {
    if let Some(refresh_token) = &tokens.refresh_token {
        state.refresh_tokens.insert(
            refresh_token.clone(),
            RefreshGrant {
                client_id: client_id.to_string(),
                user_id: tokens.user_id.clone(),
                scope: tokens.scope.clone(),
            },
        );
    }
}
