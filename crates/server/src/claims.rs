//! Claim sets carried by access tokens and ID tokens.

use crate::error::IssuanceError;
use crate::identity::User;
use crate::scope::{EMAIL, OPENID, PROFILE, has_scope};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Anything with an `exp` claim.
pub trait Expiring {
    fn expires_at(&self) -> i64;

    /// Valid while `exp` is strictly after `now`.
    fn validate_at(&self, now: OffsetDateTime) -> Result<(), IssuanceError> {
        if self.expires_at() > now.unix_timestamp() {
            Ok(())
        } else {
            Err(IssuanceError::TokenExpired)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub scope: String,
    pub user: TokenUser,
}

impl Expiring for AccessClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailClaims {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoneinfo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl ProfileClaims {
    fn from_user(user: &User) -> Self {
        let name = match (&user.given_name, &user.family_name) {
            (Some(given), Some(family)) => Some(format!("{given} {family}")),
            _ => None,
        };
        ProfileClaims {
            name,
            family_name: user.family_name.clone(),
            given_name: user.given_name.clone(),
            middle_name: user.middle_name.clone(),
            nickname: user.nickname.clone(),
            preferred_username: user.preferred_username.clone(),
            profile: user.profile.clone(),
            picture: user.picture.clone(),
            website: user.website.clone(),
            gender: user.gender.clone(),
            birthdate: user.birthdate.clone(),
            zoneinfo: user.zoneinfo.clone(),
            locale: user.locale.clone(),
            updated_at: user.updated_at.map(|t| t.unix_timestamp()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    #[serde(flatten)]
    pub email: Option<EmailClaims>,
    #[serde(flatten)]
    pub profile: Option<ProfileClaims>,
}

impl Expiring for IdTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// Builds claim sets from a resolved user and the granted scope.
#[derive(Clone, Debug)]
pub struct ClaimsAssembler {
    issuer: String,
}

impl ClaimsAssembler {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn access_claims(
        &self,
        client_id: &str,
        user: &User,
        granted_scope: &str,
        expires_at: OffsetDateTime,
    ) -> AccessClaims {
        AccessClaims {
            aud: client_id.to_string(),
            sub: user.id.clone(),
            exp: expires_at.unix_timestamp(),
            scope: granted_scope.to_string(),
            user: TokenUser {
                email: user.email.clone(),
            },
        }
    }

    /// `None` unless `openid` was granted.
    pub fn id_token_claims(
        &self,
        client_id: &str,
        user: &User,
        granted_scope: &str,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Option<IdTokenClaims> {
        if !has_scope(granted_scope, OPENID) {
            return None;
        }
        Some(IdTokenClaims {
            aud: client_id.to_string(),
            sub: user.id.clone(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            iss: self.issuer.clone(),
            email: has_scope(granted_scope, EMAIL).then(|| EmailClaims {
                email: user.email.clone(),
                email_verified: user.email_verified,
            }),
            profile: has_scope(granted_scope, PROFILE).then(|| ProfileClaims::from_user(user)),
        })
    }
}
