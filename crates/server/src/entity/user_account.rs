//! Federated account link: `(id, type)` identifies an account at an external
//! identity provider and points at exactly one canonical user.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_account")]
pub struct Model {
    /// Provider-specific account identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Provider type (e.g. "idp", "google")
    #[sea_orm(primary_key, auto_increment = false, column_name = "type")]
    pub account_type: String,
    pub user_id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

// The user row may live in a remote directory, so no foreign key relation is declared.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
