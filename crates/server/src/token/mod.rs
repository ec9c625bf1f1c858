//! Token issuance.
//!
//! [`TokenIssuer`] resolves the subject, authorizes the requested scope,
//! assembles claims and signs them with the current key. An ID token is only
//! produced when `openid` is granted and is returned next to the access token,
//! never inside it.

mod refresh;

pub use refresh::{Redemption, RefreshGrant, RefreshTokenStore, derive_refresh_token};

use crate::claims::{AccessClaims, ClaimsAssembler, Expiring, IdTokenClaims};
use crate::error::IssuanceError;
use crate::identity::{IdentityResolver, User};
use crate::keys::{SigningKey, SigningKeyManager};
use crate::logging::WideEvent;
use crate::scope::ScopeAuthorizer;
use jsonwebtoken::{Header, Validation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::Instrument;

/// Run `fut` to completion or fail with [`IssuanceError::DeadlineExceeded`].
///
/// The future is dropped when the deadline passes, cancelling whatever remote
/// call it was waiting on.
pub async fn within_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, IssuanceError>
where
    F: Future<Output = Result<T, IssuanceError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .unwrap_or(Err(IssuanceError::DeadlineExceeded(deadline)))
}

/// Who the token is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    /// Already resolved canonical user id.
    UserId(String),
    /// Federated account, resolved (and linked on first sight) before issuing.
    Account {
        account_id: String,
        email: String,
        provider: String,
    },
}

#[derive(Clone, Debug)]
pub struct IssueRequest {
    pub client_id: String,
    pub subject: Subject,
    pub scope: String,
    pub access_created_at: OffsetDateTime,
    pub access_expires_in: Duration,
    pub generate_refresh: bool,
    /// Upper bound for the whole issuance, including every remote call.
    pub deadline: Option<Duration>,
}

impl IssueRequest {
    pub fn new(
        client_id: impl Into<String>,
        subject: Subject,
        scope: impl Into<String>,
        access_expires_in: Duration,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            subject,
            scope: scope.into(),
            access_created_at: OffsetDateTime::now_utc(),
            access_expires_in,
            generate_refresh: false,
            deadline: None,
        }
    }

    pub fn with_refresh(mut self) -> Self {
        self.generate_refresh = true;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn created_at(mut self, at: OffsetDateTime) -> Self {
        self.access_created_at = at;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    /// Scope actually granted, which may be narrower than requested.
    pub scope: String,
    pub expires_in: u64,
    pub id_token: Option<String>,
}

impl IssuedTokens {
    /// Fields returned next to the standard token response.
    pub fn extension_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(id_token) = &self.id_token {
            fields.insert("id_token".into(), Value::String(id_token.clone()));
        }
        fields
    }
}

pub struct TokenIssuer {
    keys: Arc<SigningKeyManager>,
    identities: Arc<IdentityResolver>,
    scopes: Arc<ScopeAuthorizer>,
    claims: ClaimsAssembler,
}

impl TokenIssuer {
    pub fn new(
        keys: Arc<SigningKeyManager>,
        identities: Arc<IdentityResolver>,
        scopes: Arc<ScopeAuthorizer>,
        claims: ClaimsAssembler,
    ) -> Self {
        Self {
            keys,
            identities,
            scopes,
            claims,
        }
    }

    pub fn keys(&self) -> &Arc<SigningKeyManager> {
        &self.keys
    }

    /// Issue an access token (plus refresh and ID token when applicable).
    ///
    /// Nothing is returned on partial failure. When the request carries a
    /// deadline, every in-flight downstream call is dropped once it passes.
    #[tracing::instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn issue(&self, request: &IssueRequest) -> Result<IssuedTokens, IssuanceError> {
        let evt = WideEvent::new("token_issuance", module_path!());
        evt.add("client_id", &request.client_id);

        let inner = self
            .issue_inner(request, &evt)
            .instrument(evt.span().clone());
        let result = match request.deadline {
            Some(deadline) => within_deadline(deadline, inner).await,
            None => inner.await,
        };

        match &result {
            Ok(tokens) => {
                evt.add("scope", &tokens.scope);
                evt.add("outcome", "issued");
                evt.info("token issued");
            }
            Err(e) => {
                evt.add("outcome", e.kind());
                evt.add("error", e);
                evt.warn("token issuance failed");
            }
        }
        result
    }

    async fn issue_inner(
        &self,
        request: &IssueRequest,
        evt: &WideEvent,
    ) -> Result<IssuedTokens, IssuanceError> {
        let user = self.resolve_subject(&request.subject).await?;
        evt.add("user_id", &user.id);

        let granted = self.scopes.authorize(&request.scope, &user.id).await?;

        let issued_at = request.access_created_at;
        let expires_at = issued_at + request.access_expires_in;
        let access_claims = self
            .claims
            .access_claims(&request.client_id, &user, &granted, expires_at);
        let id_claims =
            self.claims
                .id_token_claims(&request.client_id, &user, &granted, issued_at, expires_at);

        let key = self.keys.signing_key().await?;
        let access_token = self.sign(&access_claims, &key)?;
        let id_token = id_claims
            .map(|claims| self.sign(&claims, &key))
            .transpose()?;
        let refresh_token = request
            .generate_refresh
            .then(|| derive_refresh_token(&access_token));

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            user_id: user.id,
            scope: granted,
            expires_in: request.access_expires_in.as_secs(),
            id_token,
        })
    }

    async fn resolve_subject(&self, subject: &Subject) -> Result<User, IssuanceError> {
        match subject {
            Subject::UserId(id) => self
                .identities
                .get_user(id)
                .await?
                .ok_or_else(|| IssuanceError::IdentityService(format!("user {id} not found"))),
            Subject::Account {
                account_id,
                email,
                provider,
            } => {
                self.identities
                    .get_or_create_user(account_id, email, provider)
                    .await
            }
        }
    }

    fn sign<T: Serialize>(&self, claims: &T, key: &SigningKey) -> Result<String, IssuanceError> {
        let method = self.keys.method();
        let mut header = Header::new(method.algorithm());
        header.kid = Some(key.kid().to_string());
        let encoding_key = method.encoding_key(key)?;
        jsonwebtoken::encode(&header, claims, &encoding_key)
            .map_err(|e| IssuanceError::Signing(e.to_string()))
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, IssuanceError> {
        self.verify(token).await
    }

    pub async fn verify_id_token(&self, token: &str) -> Result<IdTokenClaims, IssuanceError> {
        self.verify(token).await
    }

    /// Check signature and `kid` against the current key, then expiry.
    #[tracing::instrument(level = "debug", skip_all)]
    async fn verify<T: DeserializeOwned + Expiring>(&self, token: &str) -> Result<T, IssuanceError> {
        let key = self.keys.signing_key().await?;
        let method = self.keys.method();

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| IssuanceError::InvalidToken(e.to_string()))?;
        if header.kid.as_deref() != Some(key.kid()) {
            return Err(IssuanceError::InvalidToken("unknown key id".into()));
        }

        let mut validation = Validation::new(method.algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let data = jsonwebtoken::decode::<T>(token, &method.decoding_key(&key)?, &validation)
            .map_err(|e| IssuanceError::InvalidToken(e.to_string()))?;
        data.claims.validate_at(OffsetDateTime::now_utc())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{DEFAULT_NETWORK_TIMEOUT, HttpClient};
    use crate::identity::DbDirectory;
    use crate::identity::testing::setup_db;
    use crate::keys::{
        KeySource, LocalKeySource, RemoteJwksSource, SigningMethod, test_signing_key,
    };
    use crate::scope::{ScopeAuthorizer, ScopePolicy};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOUR: Duration = Duration::from_secs(3600);

    async fn issuer_with(source: Arc<dyn KeySource>, signing: SigningMethod, policy: ScopePolicy) -> TokenIssuer {
        let db = setup_db(true).await;
        let directory = Arc::new(DbDirectory::new(db.clone(), None));
        TokenIssuer::new(
            Arc::new(SigningKeyManager::new(source, signing, Duration::from_secs(60))),
            Arc::new(IdentityResolver::new(db, directory)),
            Arc::new(ScopeAuthorizer::new(policy)),
            ClaimsAssembler::new("https://auth.example.com"),
        )
    }

    async fn issuer() -> TokenIssuer {
        issuer_with(
            Arc::new(LocalKeySource::with_key(test_signing_key())),
            SigningMethod::default(),
            ScopePolicy::AllowUnvalidated,
        )
        .await
    }

    fn account(id: &str, email: &str) -> Subject {
        Subject::Account {
            account_id: id.into(),
            email: email.into(),
            provider: "idp".into(),
        }
    }

    #[tokio::test]
    async fn issued_access_token_verifies() {
        let issuer = issuer().await;
        let request = IssueRequest::new("client-a", account("acct-1", "a@x.com"), "custom:read", HOUR);
        let tokens = issuer.issue(&request).await.unwrap();

        let header = jsonwebtoken::decode_header(&tokens.access_token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("test-kid"));

        let claims = issuer.verify_access_token(&tokens.access_token).await.unwrap();
        assert_eq!(claims.aud, "client-a");
        assert_eq!(claims.sub, tokens.user_id);
        assert_eq!(claims.scope, "custom:read");
        assert_eq!(claims.user.email, "a@x.com");
        assert!(tokens.id_token.is_none());
        assert!(tokens.extension_fields().is_empty());
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.expires_in, 3600);
    }

    #[tokio::test]
    async fn openid_scope_adds_id_token_extension() {
        let issuer = issuer().await;
        let request =
            IssueRequest::new("client-a", account("acct-1", "a@x.com"), "openid email", HOUR)
                .with_refresh();
        let tokens = issuer.issue(&request).await.unwrap();

        let id_token = tokens.id_token.clone().unwrap();
        assert_eq!(tokens.extension_fields()["id_token"], Value::String(id_token.clone()));
        let claims = issuer.verify_id_token(&id_token).await.unwrap();
        assert_eq!(claims.iss, "https://auth.example.com");
        assert_eq!(claims.email.unwrap().email, "a@x.com");

        // The ID token never rides inside the access token.
        let access = issuer.verify_access_token(&tokens.access_token).await.unwrap();
        assert_eq!(access.scope, "openid email");
        assert!(!tokens.access_token.contains(&id_token));
        assert!(tokens.refresh_token.is_some());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let issuer = issuer().await;
        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR)
            .created_at(OffsetDateTime::now_utc() - time::Duration::hours(2));
        let tokens = issuer.issue(&request).await.unwrap();

        assert!(matches!(
            issuer.verify_access_token(&tokens.access_token).await,
            Err(IssuanceError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn tampered_token_is_invalid() {
        let issuer = issuer().await;
        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR);
        let mut token = issuer.issue(&request).await.unwrap().access_token;
        token.push('A');
        assert!(matches!(
            issuer.verify_access_token(&token).await,
            Err(IssuanceError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_id_is_identity_error() {
        let issuer = issuer().await;
        let request = IssueRequest::new("c", Subject::UserId("ghost".into()), "openid", HOUR);
        assert!(matches!(
            issuer.issue(&request).await,
            Err(IssuanceError::IdentityService(_))
        ));
    }

    #[tokio::test]
    async fn resolved_user_id_subject() {
        let issuer = issuer().await;
        let first = issuer
            .issue(&IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR))
            .await
            .unwrap();
        let again = issuer
            .issue(&IssueRequest::new("c", Subject::UserId(first.user_id.clone()), "openid", HOUR))
            .await
            .unwrap();
        assert_eq!(first.user_id, again.user_id);
    }

    #[tokio::test]
    async fn every_signing_family_round_trips() {
        for name in ["RS512", "PS256", "ES256", "HS256"] {
            let issuer = issuer_with(
                Arc::new(LocalKeySource::with_key(test_signing_key())),
                name.parse().unwrap(),
                ScopePolicy::AllowUnvalidated,
            )
            .await;
            let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR);
            let tokens = issuer.issue(&request).await.unwrap();
            let header = jsonwebtoken::decode_header(&tokens.access_token).unwrap();
            assert_eq!(format!("{:?}", header.alg), name);
            issuer.verify_access_token(&tokens.access_token).await.unwrap();
            issuer.verify_id_token(tokens.id_token.as_deref().unwrap()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn unreachable_key_provider_fails_issuance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let http = HttpClient::new(DEFAULT_NETWORK_TIMEOUT).unwrap();
        let issuer = issuer_with(
            Arc::new(RemoteJwksSource::new(server.uri(), http)),
            SigningMethod::default(),
            ScopePolicy::AllowUnvalidated,
        )
        .await;

        assert!(matches!(
            issuer.keys().signing_key().await,
            Err(IssuanceError::KeyUnavailable(_))
        ));
        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR);
        assert!(matches!(
            issuer.issue(&request).await,
            Err(IssuanceError::KeyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn denied_scope_returns_no_token() {
        let issuer = issuer_with(
            Arc::new(LocalKeySource::with_key(test_signing_key())),
            SigningMethod::default(),
            ScopePolicy::DenyUnvalidated,
        )
        .await;
        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid admin", HOUR);
        assert!(matches!(
            issuer.issue(&request).await,
            Err(IssuanceError::ScopeDenied(_))
        ));
    }

    #[tokio::test]
    async fn deadline_cancels_slow_dependencies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"result": {"valid": true}}}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        let http = HttpClient::new(DEFAULT_NETWORK_TIMEOUT).unwrap();
        let issuer = issuer_with(
            Arc::new(LocalKeySource::with_key(test_signing_key())),
            SigningMethod::default(),
            ScopePolicy::Remote(crate::graphql::GraphQlClient::new(server.uri(), http)),
        )
        .await;

        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "custom:read", HOUR)
            .with_deadline(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(matches!(
            issuer.issue(&request).await,
            Err(IssuanceError::DeadlineExceeded(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Records each new span together with its parent's name.
    #[derive(Clone, Default)]
    struct SpanParents(Arc<std::sync::Mutex<Vec<(String, Option<String>)>>>);

    impl<S> tracing_subscriber::Layer<S> for SpanParents
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fn on_new_span(
            &self,
            _attrs: &tracing::span::Attributes<'_>,
            id: &tracing::span::Id,
            ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if let Some(span) = ctx.span(id) {
                let parent = span.parent().map(|p| p.name().to_string());
                self.0.lock().unwrap().push((span.name().to_string(), parent));
            }
        }
    }

    impl SpanParents {
        fn parent_of(&self, name: &str) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(span, _)| span == name)
                .and_then(|(_, parent)| parent.clone())
        }
    }

    #[tokio::test]
    async fn issuance_steps_run_inside_the_wide_event() {
        use tracing_subscriber::layer::SubscriberExt;

        let spans = SpanParents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        let issuer = issuer().await;
        let request = IssueRequest::new("c", account("acct-1", "a@x.com"), "openid", HOUR);
        issuer.issue(&request).await.unwrap();

        assert_eq!(spans.parent_of("authorize").as_deref(), Some("wide_event"));
        assert_eq!(spans.parent_of("get_signing_key").as_deref(), Some("wide_event"));
    }
}
