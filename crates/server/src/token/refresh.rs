use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque refresh token bound to an access token: a name-based UUID of the
/// access token under a fresh random namespace, URL-safe base64, upper-cased.
pub fn derive_refresh_token(access_token: &str) -> String {
    let namespace = Uuid::new_v4();
    let id = Uuid::new_v5(&namespace, access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(id.as_bytes()).to_uppercase()
}

/// What a refresh token may be exchanged for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshGrant {
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
}

#[derive(Clone, Debug)]
struct StoreEntry {
    grant: RefreshGrant,
    expires_at: Instant,
}

impl StoreEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// A refresh token held out of the store while its exchange is in flight.
///
/// Hand it back with [`RefreshTokenStore::restore`] if the exchange fails, or
/// drop it once new tokens were issued.
#[derive(Debug)]
pub struct Redemption {
    token: String,
    entry: StoreEntry,
}

impl Redemption {
    pub fn grant(&self) -> &RefreshGrant {
        &self.entry.grant
    }
}

/// In-process store of outstanding refresh tokens. Tokens are single use.
#[derive(Clone)]
pub struct RefreshTokenStore {
    entries: Arc<DashMap<String, StoreEntry>>,
    ttl: Duration,
    last_cleanup: Arc<std::sync::Mutex<Instant>>,
}

impl RefreshTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            last_cleanup: Arc::new(std::sync::Mutex::new(Instant::now())),
        }
    }

    fn maybe_cleanup(&self) {
        const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

        if let Ok(mut last_cleanup) = self.last_cleanup.try_lock() {
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                *last_cleanup = Instant::now();
                drop(last_cleanup);
                self.entries.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    pub fn insert(&self, token: String, grant: RefreshGrant) {
        self.maybe_cleanup();
        self.entries.insert(
            token,
            StoreEntry {
                grant,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove the token for exchange, `None` if unknown or expired.
    ///
    /// Removal is atomic, so two concurrent redemptions of one token cannot
    /// both succeed.
    pub fn redeem(&self, token: &str) -> Option<Redemption> {
        self.maybe_cleanup();
        self.entries
            .remove(token)
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(token, entry)| Redemption { token, entry })
    }

    /// Put back a token whose exchange failed. It keeps its original expiry.
    pub fn restore(&self, redemption: Redemption) {
        if !redemption.entry.is_expired() {
            self.entries.insert(redemption.token, redemption.entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
