//! Signing key lifecycle.
//!
//! A [`SigningKeyManager`] owns the process-wide key cache. Keys come from a
//! [`KeySource`]: either a remote JWKS provider or a locally generated RSA key.

pub mod jwk;
mod manager;
mod method;
mod source;

pub use jwk::{Jwk, JwkSet};
pub use manager::{DEFAULT_KEY_TTL, SigningKeyManager};
pub use method::{KeyFamily, SigningMethod};
pub use source::{KeySource, LocalKeySource, RemoteJwksSource};

use crate::error::IssuanceError;
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use std::fmt;

/// The current signing key and the identifier published with it.
pub struct SigningKey {
    private_key: RsaPrivateKey,
    pkcs1_der: Vec<u8>,
    kid: String,
}

impl SigningKey {
    /// Wrap a private key. Without an explicit `kid` the RFC 7638 thumbprint is used.
    pub fn new(private_key: RsaPrivateKey, kid: Option<String>) -> Result<Self, IssuanceError> {
        let pkcs1_der = private_key
            .to_pkcs1_der()
            .map_err(|e| IssuanceError::KeyUnavailable(format!("cannot encode key: {e}")))?
            .as_bytes()
            .to_vec();
        let kid = match kid {
            Some(kid) if !kid.is_empty() => kid,
            _ => jwk::rsa_thumbprint(&private_key.to_public_key()),
        };
        Ok(Self {
            private_key,
            pkcs1_der,
            kid,
        })
    }

    pub fn from_pkcs1_pem(pem: &str, kid: Option<String>) -> Result<Self, IssuanceError> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| IssuanceError::KeyUnavailable(format!("invalid PEM key: {e}")))?;
        Self::new(private_key, kid)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn pkcs1_der(&self) -> &[u8] {
        &self.pkcs1_der
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_signing_key() -> SigningKey {
    SigningKey::from_pkcs1_pem(
        include_str!("../../tests/fixtures/signing_key.pem"),
        Some("test-kid".to_string()),
    )
    .expect("fixture key")
}
