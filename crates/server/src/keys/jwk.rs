//! JSON Web Key (RFC 7517) representation covering the RSA private parameters
//! consumed from the key provider and the public parameters we publish.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Public signing JWK for an RSA key.
    pub fn rsa_public(key: &RsaPublicKey, kid: &str, alg: &str) -> Self {
        Jwk {
            kty: "RSA".to_string(),
            key_use: Some("sig".to_string()),
            alg: Some(alg.to_string()),
            kid: Some(kid.to_string()),
            n: Some(encode_uint(key.n())),
            e: Some(encode_uint(key.e())),
            ..Default::default()
        }
    }

    /// Public signing JWK for a P-256 key given its base64url affine coordinates.
    pub fn ec_public(x: String, y: String, kid: &str, alg: &str) -> Self {
        Jwk {
            kty: "EC".to_string(),
            key_use: Some("sig".to_string()),
            alg: Some(alg.to_string()),
            kid: Some(kid.to_string()),
            crv: Some("P-256".to_string()),
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    /// Materialize an RSA private key. Requires `n`, `e`, `d`, `p` and `q`.
    pub fn to_rsa_private_key(&self) -> Result<RsaPrivateKey, String> {
        if self.kty != "RSA" {
            return Err(format!("expected an RSA key, got kty={}", self.kty));
        }
        let n = decode_uint(self.n.as_deref(), "n")?;
        let e = decode_uint(self.e.as_deref(), "e")?;
        let d = decode_uint(self.d.as_deref(), "d")
            .map_err(|_| "key has no private exponent (not a private key)".to_string())?;
        let p = decode_uint(self.p.as_deref(), "p")?;
        let q = decode_uint(self.q.as_deref(), "q")?;

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|err| format!("invalid RSA key components: {err}"))?;
        key.validate()
            .map_err(|err| format!("RSA key failed validation: {err}"))?;
        Ok(key)
    }
}

/// RFC 7638 thumbprint of an RSA public key, base64url encoded.
pub fn rsa_thumbprint(key: &RsaPublicKey) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = format!(
        r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
        encode_uint(key.e()),
        encode_uint(key.n())
    );
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(value: Option<&str>, name: &str) -> Result<BigUint, String> {
    let raw = value.ok_or_else(|| format!("missing `{name}` parameter"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|e| format!("`{name}` is not base64url: {e}"))?;
    Ok(BigUint::from_bytes_be(&bytes))
}
