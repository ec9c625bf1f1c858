//! Signing method dispatch.
//!
//! The configured JWT algorithm is parsed once into a closed [`KeyFamily`] that
//! knows how to turn the current [`SigningKey`] into encoder/decoder material.

use super::SigningKey;
use super::jwk::{Jwk, JwkSet};
use crate::error::IssuanceError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSASSA-PKCS1-v1_5 and RSASSA-PSS; the RSA key is used as-is.
    Rsa,
    /// ECDSA over P-256; the EC key is derived from the RSA key material.
    Ecdsa,
    /// HMAC; the PKCS#1 DER encoding of the key is the shared secret.
    Hmac,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigningMethod {
    name: &'static str,
    algorithm: Algorithm,
    family: KeyFamily,
}

impl FromStr for SigningMethod {
    type Err = IssuanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, algorithm, family) = match s.trim().to_ascii_uppercase().as_str() {
            "RS256" => ("RS256", Algorithm::RS256, KeyFamily::Rsa),
            "RS384" => ("RS384", Algorithm::RS384, KeyFamily::Rsa),
            "RS512" => ("RS512", Algorithm::RS512, KeyFamily::Rsa),
            "PS256" => ("PS256", Algorithm::PS256, KeyFamily::Rsa),
            "PS384" => ("PS384", Algorithm::PS384, KeyFamily::Rsa),
            "PS512" => ("PS512", Algorithm::PS512, KeyFamily::Rsa),
            "ES256" => ("ES256", Algorithm::ES256, KeyFamily::Ecdsa),
            "HS256" => ("HS256", Algorithm::HS256, KeyFamily::Hmac),
            "HS384" => ("HS384", Algorithm::HS384, KeyFamily::Hmac),
            "HS512" => ("HS512", Algorithm::HS512, KeyFamily::Hmac),
            _ => return Err(IssuanceError::UnsupportedSigningMethod(s.to_string())),
        };
        Ok(SigningMethod {
            name,
            algorithm,
            family,
        })
    }
}

impl fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Default for SigningMethod {
    fn default() -> Self {
        SigningMethod {
            name: "RS256",
            algorithm: Algorithm::RS256,
            family: KeyFamily::Rsa,
        }
    }
}

impl SigningMethod {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn encoding_key(&self, key: &SigningKey) -> Result<EncodingKey, IssuanceError> {
        match self.family {
            KeyFamily::Rsa => Ok(EncodingKey::from_rsa_der(key.pkcs1_der())),
            KeyFamily::Hmac => Ok(EncodingKey::from_secret(key.pkcs1_der())),
            KeyFamily::Ecdsa => {
                let der = derive_ec_key(key)?
                    .to_pkcs8_der()
                    .map_err(|e| IssuanceError::KeyUnavailable(format!("EC encoding: {e}")))?;
                Ok(EncodingKey::from_ec_der(der.as_bytes()))
            }
        }
    }

    pub fn decoding_key(&self, key: &SigningKey) -> Result<DecodingKey, IssuanceError> {
        match self.family {
            KeyFamily::Rsa => {
                let public = key.private_key().to_public_key();
                DecodingKey::from_rsa_components(
                    &URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                    &URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
                )
                .map_err(|e| IssuanceError::KeyUnavailable(e.to_string()))
            }
            KeyFamily::Hmac => Ok(DecodingKey::from_secret(key.pkcs1_der())),
            KeyFamily::Ecdsa => {
                let (x, y) = ec_coordinates(key)?;
                DecodingKey::from_ec_components(&x, &y)
                    .map_err(|e| IssuanceError::KeyUnavailable(e.to_string()))
            }
        }
    }

    /// Public key set verifiers need for tokens signed with this method.
    /// Symmetric keys are never published.
    pub fn public_jwks(&self, key: &SigningKey) -> Result<JwkSet, IssuanceError> {
        let keys = match self.family {
            KeyFamily::Rsa => vec![Jwk::rsa_public(
                &key.private_key().to_public_key(),
                key.kid(),
                self.name,
            )],
            KeyFamily::Ecdsa => {
                let (x, y) = ec_coordinates(key)?;
                vec![Jwk::ec_public(x, y, key.kid(), self.name)]
            }
            KeyFamily::Hmac => Vec::new(),
        };
        Ok(JwkSet { keys })
    }
}

/// Deterministic P-256 key derived from the SHA-256 digest of the RSA key's PKCS#1 DER.
fn derive_ec_key(key: &SigningKey) -> Result<p256::SecretKey, IssuanceError> {
    let digest = Sha256::digest(key.pkcs1_der());
    p256::SecretKey::from_slice(&digest)
        .map_err(|e| IssuanceError::KeyUnavailable(format!("EC derivation: {e}")))
}

fn ec_coordinates(key: &SigningKey) -> Result<(String, String), IssuanceError> {
    let point = derive_ec_key(key)?.public_key().to_encoded_point(false);
    let missing = || IssuanceError::KeyUnavailable("EC point has no affine coordinates".into());
    let x = point.x().ok_or_else(missing)?;
    let y = point.y().ok_or_else(missing)?;
    Ok((URL_SAFE_NO_PAD.encode(x), URL_SAFE_NO_PAD.encode(y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_signing_key;

    #[test]
    fn parses_known_methods() {
        let rs: SigningMethod = "RS256".parse().unwrap();
        assert_eq!(rs.family(), KeyFamily::Rsa);
        assert_eq!(rs.algorithm(), Algorithm::RS256);
        assert_eq!("ps384".parse::<SigningMethod>().unwrap().family(), KeyFamily::Rsa);
        assert_eq!("ES256".parse::<SigningMethod>().unwrap().family(), KeyFamily::Ecdsa);
        assert_eq!("HS512".parse::<SigningMethod>().unwrap().family(), KeyFamily::Hmac);
    }

    #[test]
    fn rejects_unknown_methods() {
        for name in ["none", "ES384", "EdDSA", ""] {
            assert!(matches!(
                name.parse::<SigningMethod>(),
                Err(IssuanceError::UnsupportedSigningMethod(_))
            ));
        }
    }

    #[test]
    fn every_family_yields_key_material() {
        let key = test_signing_key();
        for name in ["RS256", "PS256", "ES256", "HS256"] {
            let method: SigningMethod = name.parse().unwrap();
            assert!(method.encoding_key(&key).is_ok(), "{name}");
            assert!(method.decoding_key(&key).is_ok(), "{name}");
        }
    }

    #[test]
    fn ec_derivation_is_deterministic() {
        let key = test_signing_key();
        assert_eq!(ec_coordinates(&key).unwrap(), ec_coordinates(&key).unwrap());
    }

    #[test]
    fn jwks_shape_per_family() {
        let key = test_signing_key();
        let rs = "RS256".parse::<SigningMethod>().unwrap().public_jwks(&key).unwrap();
        assert_eq!(rs.keys.len(), 1);
        assert_eq!(rs.keys[0].kty, "RSA");
        assert_eq!(rs.keys[0].alg.as_deref(), Some("RS256"));
        assert_eq!(rs.keys[0].kid.as_deref(), Some(key.kid()));

        let es = "ES256".parse::<SigningMethod>().unwrap().public_jwks(&key).unwrap();
        assert_eq!(es.keys[0].kty, "EC");
        assert_eq!(es.keys[0].crv.as_deref(), Some("P-256"));

        let hs = "HS256".parse::<SigningMethod>().unwrap().public_jwks(&key).unwrap();
        assert!(hs.keys.is_empty());
    }
}
