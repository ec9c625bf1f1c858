//! Client for the identity-provider auth service.

use crate::error::{IssuanceError, RemoteError};
use crate::graphql::{GraphQlClient, vars};
use crate::http_client::HttpClient;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

const LOGIN_QUERY: &str = r#"
query($email: String!, $password: String!) {
    result: login(email: $email, password: $password) {
        id
        email
        email_verified
    }
}
"#;

const CREATE_USER_MUTATION: &str = r#"
mutation($email: String!, $password: String!) {
    result: createUser(input: {email: $email, password: $password}) {
        id
        email
        email_verified
    }
}
"#;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IdpUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

/// OAuth2 token endpoint accepting the resource-owner password grant.
#[derive(Clone, Debug)]
pub struct PasswordGrantEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BearerClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Clone, Debug)]
pub struct IdpClient {
    graphql: GraphQlClient,
    password_grant: Option<PasswordGrantEndpoint>,
    http: HttpClient,
}

impl IdpClient {
    pub fn new(url: impl Into<String>, http: HttpClient) -> Self {
        Self {
            graphql: GraphQlClient::new(url, http.clone()),
            password_grant: None,
            http,
        }
    }

    pub fn with_password_grant(mut self, endpoint: PasswordGrantEndpoint) -> Self {
        self.password_grant = Some(endpoint);
        self
    }

    pub fn has_password_grant(&self) -> bool {
        self.password_grant.is_some()
    }

    /// GraphQL `login`; a null result means the credentials were rejected.
    #[tracing::instrument(name = "idp_login", skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<IdpUser>, IssuanceError> {
        let user = self
            .graphql
            .run::<IdpUser>(LOGIN_QUERY, vars([("email", email), ("password", password)]))
            .await?;
        Ok(user)
    }

    /// Register `email` with an initial password.
    ///
    /// `Ok(None)` when the provider rejects the registration, typically because
    /// the email is already registered. Transport failures stay errors.
    #[tracing::instrument(name = "idp_create_user", skip(self, password))]
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<IdpUser>, IssuanceError> {
        let created = self
            .graphql
            .run::<IdpUser>(
                CREATE_USER_MUTATION,
                vars([("email", email), ("password", password)]),
            )
            .await;
        match created {
            Ok(Some(user)) => Ok(Some(user)),
            Ok(None) => Err(IssuanceError::IdentityService("createUser returned no user".into())),
            Err(RemoteError::GraphQl(message)) => {
                debug!(%message, "identity provider rejected createUser");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Password grant against the provider's token endpoint.
    ///
    /// Returns `Ok(None)` when no endpoint is configured or the endpoint answers
    /// with a client error. The returned bearer token is only parsed, its
    /// signature is not verified.
    #[tracing::instrument(name = "idp_password_grant", skip(self, password))]
    pub async fn login_with_password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<IdpUser>, IssuanceError> {
        let Some(endpoint) = &self.password_grant else {
            return Ok(None);
        };

        let mut form = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("client_id", endpoint.client_id.as_str()),
            ("scope", "openid email"),
        ];
        if let Some(secret) = &endpoint.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let (status, body) = self.http.post_form(&endpoint.token_url, &form).await?;
        if status.is_client_error() {
            debug!(%status, "password grant rejected credentials");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Http {
                status,
                context: String::from_utf8_lossy(&body).chars().take(200).collect(),
            }
            .into());
        }

        let tokens: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| IssuanceError::from(RemoteError::InvalidJson(e.to_string())))?;
        let bearer = tokens.id_token.as_deref().unwrap_or(&tokens.access_token);
        let claims = read_unverified_claims(bearer)?;

        let email = claims.email.unwrap_or_else(|| {
            warn!("bearer token carries no email claim, using the username");
            username.to_string()
        });
        Ok(Some(IdpUser {
            id: claims.sub,
            email,
            email_verified: claims.email_verified,
        }))
    }
}

fn read_unverified_claims(token: &str) -> Result<BearerClaims, IssuanceError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| IssuanceError::IdentityService(format!("malformed bearer token: {e}")))?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    jsonwebtoken::decode::<BearerClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| IssuanceError::IdentityService(format!("malformed bearer token: {e}")))
}
