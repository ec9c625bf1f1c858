use super::jwk::JwkSet;
use super::method::SigningMethod;
use super::source::KeySource;
use super::SigningKey;
use crate::error::IssuanceError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CachedKey {
    key: Arc<SigningKey>,
    expires_at: Instant,
}

impl CachedKey {
    fn new(key: Arc<SigningKey>, ttl: Duration) -> Self {
        Self {
            key,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Owns the current signing key and refreshes it from its [`KeySource`] when the TTL lapses.
///
/// Refreshes are single-flight: callers that find the cache empty queue on
/// `refresh` and re-check the cache once they hold it, so one load serves all of them.
pub struct SigningKeyManager {
    source: Arc<dyn KeySource>,
    method: SigningMethod,
    ttl: Duration,
    cache: RwLock<Option<CachedKey>>,
    refresh: Mutex<()>,
}

impl SigningKeyManager {
    pub fn new(source: Arc<dyn KeySource>, method: SigningMethod, ttl: Duration) -> Self {
        Self {
            source,
            method,
            ttl,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn method(&self) -> SigningMethod {
        self.method
    }

    /// Current key with its `kid`, loading it if the cache is empty or expired.
    #[tracing::instrument(name = "get_signing_key", skip(self), fields(source = self.source.describe()))]
    pub async fn signing_key(&self) -> Result<Arc<SigningKey>, IssuanceError> {
        if let Some(key) = self.cached().await {
            return Ok(key);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refilled the cache while we waited.
        if let Some(key) = self.cached().await {
            return Ok(key);
        }

        let key = self.source.load().await?;
        *self.cache.write().await = Some(CachedKey::new(key.clone(), self.ttl));
        debug!(kid = key.kid(), ttl_secs = self.ttl.as_secs(), "Signing key cached");
        Ok(key)
    }

    /// Public key set for the current key, as served on the JWKS endpoint.
    pub async fn public_jwks(&self) -> Result<JwkSet, IssuanceError> {
        let key = self.signing_key().await?;
        self.method.public_jwks(&key)
    }

    /// Drop the cached key so the next call reloads it.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn cached(&self) -> Option<Arc<SigningKey>> {
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|c| !c.is_expired())
            .map(|c| c.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_signing_key;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts loads and stamps each load with a fresh kid.
    struct CountingSource {
        loads: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySource for CountingSource {
        async fn load(&self) -> Result<Arc<SigningKey>, IssuanceError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(IssuanceError::KeyUnavailable("provider unreachable".into()));
            }
            let base = test_signing_key();
            let key = SigningKey::new(base.private_key().clone(), Some(format!("kid-{n}")))?;
            Ok(Arc::new(key))
        }

        fn describe(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = CountingSource::new(false);
        let manager = SigningKeyManager::new(source.clone(), SigningMethod::default(), DEFAULT_KEY_TTL);

        let a = manager.signing_key().await.unwrap();
        let b = manager.signing_key().await.unwrap();
        assert_eq!(a.kid(), b.kid());
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn refetches_after_expiry() {
        let source = CountingSource::new(false);
        let manager =
            SigningKeyManager::new(source.clone(), SigningMethod::default(), Duration::from_millis(50));

        let a = manager.signing_key().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let b = manager.signing_key().await.unwrap();
        assert_eq!(source.loads(), 2);
        assert_ne!(a.kid(), b.kid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_load() {
        let source = CountingSource::new(false);
        let manager = Arc::new(SigningKeyManager::new(
            source.clone(),
            SigningMethod::default(),
            DEFAULT_KEY_TTL,
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.signing_key().await.map(|k| k.kid().to_string())
            }));
        }
        let mut kids = Vec::new();
        for handle in handles {
            kids.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(source.loads(), 1);
        assert!(kids.iter().all(|k| k == "kid-1"));
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let source = CountingSource::new(true);
        let manager = SigningKeyManager::new(source.clone(), SigningMethod::default(), DEFAULT_KEY_TTL);

        assert!(matches!(
            manager.signing_key().await,
            Err(IssuanceError::KeyUnavailable(_))
        ));
        assert!(manager.signing_key().await.is_err());
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = CountingSource::new(false);
        let manager = SigningKeyManager::new(source.clone(), SigningMethod::default(), DEFAULT_KEY_TTL);
        manager.signing_key().await.unwrap();
        manager.invalidate().await;
        let key = manager.signing_key().await.unwrap();
        assert_eq!(key.kid(), "kid-2");
    }

    #[tokio::test]
    async fn jwks_carries_current_kid() {
        let source = CountingSource::new(false);
        let manager = SigningKeyManager::new(source, SigningMethod::default(), DEFAULT_KEY_TTL);
        let jwks = manager.public_jwks().await.unwrap();
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("kid-1"));
        assert_eq!(jwks.keys[0].alg.as_deref(), Some("RS256"));
    }
}
