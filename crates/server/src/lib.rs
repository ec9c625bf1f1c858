//! Identity and token-issuance core of an OAuth2/OpenID Connect provider.
//!
//! Authentication is federated to an external identity provider and user
//! records live in an external directory (or the local database). This crate
//! resolves federated accounts to canonical users, authorizes scopes, signs
//! access and ID tokens, and publishes the signing key set.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tracing::info;

use crate::claims::ClaimsAssembler;
use crate::config::AppConfig;
use crate::error::IssuanceError;
use crate::graphql::GraphQlClient;
use crate::http_client::HttpClient;
use crate::identity::{
    DbDirectory, GraphQlDirectory, IdentityResolver, IdpClient, PasswordAuthenticator,
    PasswordGrantEndpoint, UserDirectory,
};
use crate::keys::{KeySource, LocalKeySource, RemoteJwksSource, SigningKeyManager, SigningMethod};
use crate::scope::{ScopeAuthorizer, ScopePolicy};
use crate::token::{RefreshTokenStore, TokenIssuer};

pub mod api;
pub mod claims;
pub mod config;
pub mod entity;
pub mod error;
pub mod graphql;
pub mod http_client;
pub mod identity;
pub mod keys;
pub mod logging;
pub mod scope;
pub mod token;

/// Everything the HTTP layer needs, built once from configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub issuer: Arc<TokenIssuer>,
    pub identities: Arc<IdentityResolver>,
    /// Present only when an identity provider is configured.
    pub authenticator: Option<Arc<PasswordAuthenticator>>,
    pub refresh_tokens: RefreshTokenStore,
}

impl AppState {
    pub fn from_config(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
    ) -> Result<Self, IssuanceError> {
        let http = HttpClient::new(Duration::from_secs(config.network_timeout))?;
        let method: SigningMethod = config.signing_method.parse()?;

        let key_source: Arc<dyn KeySource> = match &config.jwks_provider_url {
            Some(url) => Arc::new(RemoteJwksSource::new(url.clone(), http.clone())),
            None => Arc::new(LocalKeySource::new(config.key_bits)),
        };
        let keys = Arc::new(SigningKeyManager::new(
            key_source,
            method,
            Duration::from_secs(config.key_cache_ttl),
        ));

        let idp = config.idp_url.as_ref().map(|url| {
            let client = IdpClient::new(url.clone(), http.clone());
            let client = match (&config.idp_token_url, &config.idp_client_id) {
                (Some(token_url), Some(client_id)) => client.with_password_grant(PasswordGrantEndpoint {
                    token_url: token_url.clone(),
                    client_id: client_id.clone(),
                    client_secret: config.idp_client_secret.clone(),
                }),
                _ => client,
            };
            Arc::new(client)
        });

        let directory: Arc<dyn UserDirectory> = match &config.id_url {
            Some(url) => Arc::new(GraphQlDirectory::new(GraphQlClient::new(url.clone(), http.clone()))),
            None => Arc::new(DbDirectory::new(db.clone(), idp.clone())),
        };
        let identities = Arc::new(IdentityResolver::new(db, directory));

        let scope_client = config
            .user_scope_validator_url
            .as_ref()
            .map(|url| GraphQlClient::new(url.clone(), http.clone()));
        let scopes = Arc::new(ScopeAuthorizer::new(ScopePolicy::from_config(
            scope_client,
            config.unvalidated_scopes,
        )));

        let issuer = Arc::new(TokenIssuer::new(
            keys,
            identities.clone(),
            scopes,
            ClaimsAssembler::new(config.issuer.clone()),
        ));
        let authenticator = idp.map(|idp| Arc::new(PasswordAuthenticator::new(idp, identities.clone())));

        info!(
            signing_method = %method,
            remote_keys = config.jwks_provider_url.is_some(),
            remote_directory = config.id_url.is_some(),
            password_grant = authenticator.is_some(),
            scope_policy = config.user_scope_validator_url.is_some(),
            "Token issuance configured"
        );

        Ok(Self {
            refresh_tokens: RefreshTokenStore::new(Duration::from_secs(config.refresh_token_expire_in)),
            config,
            issuer,
            identities,
            authenticator,
        })
    }

    /// Password authenticator, `ConfigMissing` when no identity provider is configured.
    pub fn password_authenticator(&self) -> Result<&Arc<PasswordAuthenticator>, IssuanceError> {
        self.authenticator
            .as_ref()
            .ok_or(IssuanceError::ConfigMissing("idp_url"))
    }
}
