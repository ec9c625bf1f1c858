//! Federated identity resolution.
//!
//! External accounts (`account id` + `provider type`) are linked to canonical
//! users held by a [`UserDirectory`], either the remote GraphQL directory or
//! the local database.
//!
//! ## Consistency
//!
//! - Account links are created with insert-or-ignore on their composite key,
//!   so concurrent first logins converge on a single link row.
//! - Remote calls (directory invite, identity-provider registration) finish
//!   before the transaction opens. The local user insert and the link insert
//!   then share one transaction, so a failed link insert rolls the new user
//!   back and a retry converges.

mod directory;
pub mod idp;
mod password;
mod resolver;

pub use directory::{DbDirectory, GraphQlDirectory, Invitation, NewUser, UserDirectory};
pub use idp::{IdpClient, IdpUser, PasswordGrantEndpoint};
pub use password::{IDP_PROVIDER, PasswordAuthenticator};
pub use resolver::IdentityResolver;

use crate::entity::user;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Canonical user as returned by the directory.
///
/// The remote directory only returns `id` and `email`; every other field falls back to its default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub middle_name: Option<String>,
    pub nickname: Option<String>,
    pub preferred_username: Option<String>,
    pub profile: Option<String>,
    pub picture: Option<String>,
    pub website: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<String>,
    pub zoneinfo: Option<String>,
    pub locale: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_verified: bool,
    pub address: Option<String>,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(rename = "updatedAt", with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl From<user::Model> for User {
    fn from(m: user::Model) -> Self {
        User {
            id: m.id,
            email: m.email,
            email_verified: m.email_verified,
            given_name: m.given_name,
            family_name: m.family_name,
            middle_name: m.middle_name,
            nickname: m.nickname,
            preferred_username: m.preferred_username,
            profile: m.profile,
            picture: m.picture,
            website: m.website,
            gender: m.gender,
            birthdate: m.birthdate,
            zoneinfo: m.zoneinfo,
            locale: m.locale,
            phone_number: m.phone_number,
            phone_number_verified: m.phone_number_verified,
            address: m.address,
            created_at: Some(m.created_at),
            updated_at: m.updated_at,
        }
    }
}
