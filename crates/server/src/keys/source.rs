use super::SigningKey;
use super::jwk::JwkSet;
use crate::error::IssuanceError;
use crate::http_client::HttpClient;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::traits::PublicKeyParts;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Where the signing key comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn load(&self) -> Result<Arc<SigningKey>, IssuanceError>;

    /// Short label for logs.
    fn describe(&self) -> &'static str;
}

/// Fetches a JWKS holding the private key and uses its first entry.
pub struct RemoteJwksSource {
    url: String,
    http: HttpClient,
}

impl RemoteJwksSource {
    pub fn new(url: impl Into<String>, http: HttpClient) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl KeySource for RemoteJwksSource {
    #[tracing::instrument(name = "fetch_signing_key", skip(self), fields(url = %self.url))]
    async fn load(&self) -> Result<Arc<SigningKey>, IssuanceError> {
        let set: JwkSet = self
            .http
            .get_json(&self.url)
            .await
            .map_err(|e| IssuanceError::KeyUnavailable(format!("failed to lookup key: {e}")))?;

        let first = set.keys.first().ok_or_else(|| {
            IssuanceError::KeyUnavailable("failed to lookup key: key set is empty".into())
        })?;
        let private_key = first.to_rsa_private_key().map_err(|e| {
            IssuanceError::KeyUnavailable(format!("cannot convert key to RSA private key: {e}"))
        })?;
        let key = SigningKey::new(private_key, first.kid.clone())?;
        info!(kid = key.kid(), "Fetched signing key from provider");
        Ok(Arc::new(key))
    }

    fn describe(&self) -> &'static str {
        "remote-jwks"
    }
}

/// Generates an RSA key on first use and keeps returning it, so cache
/// refreshes never rotate the `kid` of a locally generated key.
pub struct LocalKeySource {
    bits: usize,
    key: OnceCell<Arc<SigningKey>>,
}

impl LocalKeySource {
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            key: OnceCell::new(),
        }
    }

    /// Seed the source with an existing key instead of generating one.
    pub fn with_key(key: SigningKey) -> Self {
        Self {
            bits: key.private_key().size() * 8,
            key: OnceCell::new_with(Some(Arc::new(key))),
        }
    }
}

#[async_trait]
impl KeySource for LocalKeySource {
    async fn load(&self) -> Result<Arc<SigningKey>, IssuanceError> {
        let bits = self.bits;
        self.key
            .get_or_try_init(|| async move {
                let private_key =
                    tokio::task::spawn_blocking(move || RsaPrivateKey::new(&mut OsRng, bits))
                        .await
                        .map_err(|e| IssuanceError::KeyUnavailable(e.to_string()))?
                        .map_err(|e| {
                            IssuanceError::KeyUnavailable(format!("key generation failed: {e}"))
                        })?;
                let key = SigningKey::new(private_key, None)?;
                info!(kid = key.kid(), bits, "Generated new local signing key");
                Ok::<_, IssuanceError>(Arc::new(key))
            })
            .await
            .cloned()
    }

    fn describe(&self) -> &'static str {
        "local"
    }
}
