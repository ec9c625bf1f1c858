use super::User;
use super::directory::{Invitation, UserDirectory};
use crate::entity::user_account;
use crate::error::IssuanceError;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, TransactionTrait};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Maps `(account id, provider type)` to a canonical [`User`].
pub struct IdentityResolver {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(db: Arc<DatabaseConnection>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { db, directory }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, IssuanceError> {
        self.directory.get_user(user_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_user_by_account(
        &self,
        account_id: &str,
        provider: &str,
    ) -> Result<Option<User>, IssuanceError> {
        let link = user_account::Entity::find_by_id((account_id.to_string(), provider.to_string()))
            .one(self.db.as_ref())
            .await?;
        match link {
            Some(link) => self.directory.get_user(&link.user_id).await,
            None => Ok(None),
        }
    }

    /// Return the user linked to the account, creating the user and the link
    /// when the account is seen for the first time.
    #[tracing::instrument(skip(self, email))]
    pub async fn get_or_create_user(
        &self,
        account_id: &str,
        email: &str,
        provider: &str,
    ) -> Result<User, IssuanceError> {
        if let Some(user) = self.get_user_by_account(account_id, provider).await? {
            return Ok(user);
        }

        // Remote work first; the transaction only covers local writes.
        let invitation = self.directory.invite_user(email).await?;
        let txn = self.db.begin().await?;
        let user = match invitation {
            Invitation::Existing(user) => user,
            Invitation::Pending(new_user) => self.directory.store_user(&txn, new_user).await?,
        };

        let link = user_account::ActiveModel {
            id: Set(account_id.to_string()),
            account_type: Set(provider.to_string()),
            user_id: Set(user.id.clone()),
            created_at: Set(OffsetDateTime::now_utc()),
            updated_at: Set(None),
        };
        user_account::Entity::insert(link)
            .on_conflict(
                OnConflict::columns([user_account::Column::Id, user_account::Column::AccountType])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let winner = user_account::Entity::find_by_id((account_id.to_string(), provider.to_string()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                IssuanceError::IdentityService("account link missing after insert".into())
            })?;

        if winner.user_id == user.id {
            txn.commit().await?;
            info!(user_id = %user.id, "Linked account to user");
            return Ok(user);
        }

        // Lost the race to another resolver; discard whatever this attempt created.
        txn.rollback().await?;
        debug!(winner = %winner.user_id, "Account already linked concurrently");
        self.directory.get_user(&winner.user_id).await?.ok_or_else(|| {
            IssuanceError::IdentityService(format!("linked user {} not found", winner.user_id))
        })
    }
}
