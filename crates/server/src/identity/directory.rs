use super::User;
use super::idp::IdpClient;
use crate::entity::user;
use crate::error::IssuanceError;
use crate::graphql::{GraphQlClient, vars};
use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

const GET_USER_QUERY: &str = r#"
query($id: ID!) {
    result: user(id: $id) {
        id
        email
    }
}
"#;

const INVITE_USER_MUTATION: &str = r#"
mutation($email: String!) {
    result: inviteUser(email: $email) {
        id
        email
    }
}
"#;

const INITIAL_PASSWORD_LEN: usize = 16;

/// Result of the remote half of a first-or-create by email.
#[derive(Clone, Debug, PartialEq)]
pub enum Invitation {
    /// The directory already holds this user.
    Existing(User),
    /// Still has to be written with [`UserDirectory::store_user`].
    Pending(NewUser),
}

/// A user accepted by the directory but not yet written locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub email_verified: bool,
}

/// Store of canonical users.
///
/// Creation happens in two steps so that no remote call runs while the
/// resolver holds a database transaction: [`invite_user`](Self::invite_user)
/// first, with no transaction open, then [`store_user`](Self::store_user)
/// inside it for pending users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, IssuanceError>;

    /// First-or-create by email, up to the local write.
    async fn invite_user(&self, email: &str) -> Result<Invitation, IssuanceError>;

    /// Write a pending user through the resolver's open transaction.
    async fn store_user(
        &self,
        _txn: &DatabaseTransaction,
        new_user: NewUser,
    ) -> Result<User, IssuanceError> {
        Err(IssuanceError::IdentityService(format!(
            "directory cannot store {}",
            new_user.email
        )))
    }
}

/// Remote identity directory reached over GraphQL.
pub struct GraphQlDirectory {
    client: GraphQlClient,
}

impl GraphQlDirectory {
    pub fn new(client: GraphQlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserDirectory for GraphQlDirectory {
    #[tracing::instrument(name = "directory_get_user", skip(self), fields(directory = "graphql"))]
    async fn get_user(&self, id: &str) -> Result<Option<User>, IssuanceError> {
        Ok(self.client.run(GET_USER_QUERY, vars([("id", id)])).await?)
    }

    #[tracing::instrument(name = "directory_invite_user", skip(self), fields(directory = "graphql"))]
    async fn invite_user(&self, email: &str) -> Result<Invitation, IssuanceError> {
        self.client
            .run(INVITE_USER_MUTATION, vars([("email", email)]))
            .await?
            .map(Invitation::Existing)
            .ok_or_else(|| IssuanceError::IdentityService("inviteUser returned no user".into()))
    }
}

/// Users kept in the local `user` table.
///
/// New users get a UUID id. When an identity provider is attached, a random
/// initial password is registered there so the user can later reset it.
pub struct DbDirectory {
    db: Arc<DatabaseConnection>,
    idp: Option<Arc<IdpClient>>,
}

impl DbDirectory {
    pub fn new(db: Arc<DatabaseConnection>, idp: Option<Arc<IdpClient>>) -> Self {
        Self { db, idp }
    }
}

#[async_trait]
impl UserDirectory for DbDirectory {
    #[tracing::instrument(name = "directory_get_user", skip(self), fields(directory = "db"))]
    async fn get_user(&self, id: &str) -> Result<Option<User>, IssuanceError> {
        let found = user::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?;
        Ok(found.map(User::from))
    }

    #[tracing::instrument(name = "directory_invite_user", skip(self), fields(directory = "db"))]
    async fn invite_user(&self, email: &str) -> Result<Invitation, IssuanceError> {
        if let Some(existing) = find_by_email(self.db.as_ref(), email).await? {
            return Ok(Invitation::Existing(existing.into()));
        }

        let mut new_user = NewUser {
            email: email.to_string(),
            email_verified: false,
        };
        if let Some(idp) = &self.idp {
            // A rejection means an earlier attempt already registered the
            // email and then failed locally; carry on with the local write.
            if let Some(idp_user) = idp.create_user(email, &initial_password()).await? {
                new_user.email = idp_user.email;
                new_user.email_verified = idp_user.email_verified;
            }
        }
        Ok(Invitation::Pending(new_user))
    }

    #[tracing::instrument(name = "directory_store_user", skip(self, txn, new_user), fields(directory = "db"))]
    async fn store_user(
        &self,
        txn: &DatabaseTransaction,
        new_user: NewUser,
    ) -> Result<User, IssuanceError> {
        let row = user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(new_user.email.clone()),
            email_verified: Set(new_user.email_verified),
            given_name: Set(None),
            family_name: Set(None),
            middle_name: Set(None),
            nickname: Set(None),
            preferred_username: Set(None),
            profile: Set(None),
            picture: Set(None),
            website: Set(None),
            gender: Set(None),
            birthdate: Set(None),
            zoneinfo: Set(None),
            locale: Set(None),
            phone_number: Set(None),
            phone_number_verified: Set(false),
            address: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
            updated_at: Set(None),
        };
        // A concurrent invite for the same email may have won; keep its row.
        user::Entity::insert(row)
            .on_conflict(OnConflict::column(user::Column::Email).do_nothing().to_owned())
            .exec_without_returning(txn)
            .await?;

        let created = find_by_email(txn, &new_user.email).await?.ok_or_else(|| {
            IssuanceError::IdentityService(format!("user for {} vanished after insert", new_user.email))
        })?;
        info!(user_id = %created.id, "Created local user");
        Ok(created.into())
    }
}

async fn find_by_email<C: ConnectionTrait>(
    conn: &C,
    email: &str,
) -> Result<Option<user::Model>, IssuanceError> {
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(conn)
        .await?)
}

fn initial_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INITIAL_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{DEFAULT_NETWORK_TIMEOUT, HttpClient};
    use crate::identity::testing::setup_db;
    use sea_orm::TransactionTrait;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> HttpClient {
        HttpClient::new(DEFAULT_NETWORK_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn graphql_directory_get_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("user(id: $id)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"result": {"id": "u1", "email": "a@x.com"}}
            })))
            .mount(&server)
            .await;

        let directory = GraphQlDirectory::new(GraphQlClient::new(server.uri(), http()));
        let user = directory.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn graphql_directory_missing_user_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"result": null}})),
            )
            .mount(&server)
            .await;

        let directory = GraphQlDirectory::new(GraphQlClient::new(server.uri(), http()));
        assert!(directory.get_user("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn graphql_directory_invite_returns_existing_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("inviteUser("))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"result": {"id": "u7", "email": "a@x.com"}}
            })))
            .mount(&server)
            .await;

        let directory = GraphQlDirectory::new(GraphQlClient::new(server.uri(), http()));
        let invitation = directory.invite_user("a@x.com").await.unwrap();
        assert!(matches!(invitation, Invitation::Existing(ref u) if u.id == "u7"));
    }

    async fn invite_and_store(directory: &DbDirectory, db: &DatabaseConnection, email: &str) -> User {
        match directory.invite_user(email).await.unwrap() {
            Invitation::Existing(user) => user,
            Invitation::Pending(new_user) => {
                let txn = db.begin().await.unwrap();
                let user = directory.store_user(&txn, new_user).await.unwrap();
                txn.commit().await.unwrap();
                user
            }
        }
    }

    #[tokio::test]
    async fn db_directory_invite_is_first_or_create() {
        let db = setup_db(false).await;
        let directory = DbDirectory::new(db.clone(), None);

        assert_eq!(
            directory.invite_user("a@x.com").await.unwrap(),
            Invitation::Pending(NewUser {
                email: "a@x.com".into(),
                email_verified: false,
            })
        );
        let first = invite_and_store(&directory, &db, "a@x.com").await;
        let second = directory.invite_user("a@x.com").await.unwrap();

        assert!(uuid::Uuid::parse_str(&first.id).is_ok());
        assert_eq!(second, Invitation::Existing(first.clone()));
        let fetched = directory.get_user(&first.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, "a@x.com");
    }

    #[tokio::test]
    async fn concurrent_store_keeps_first_row() {
        let db = setup_db(false).await;
        let directory = DbDirectory::new(db.clone(), None);
        let pending = NewUser {
            email: "a@x.com".into(),
            email_verified: false,
        };

        let txn = db.begin().await.unwrap();
        let first = directory.store_user(&txn, pending.clone()).await.unwrap();
        let second = directory.store_user(&txn, pending).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn db_directory_registers_new_user_with_idp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("createUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"result": {"id": "idp-9", "email": "new@x.com", "email_verified": true}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let db = setup_db(false).await;
        let idp = Arc::new(IdpClient::new(server.uri(), http()));
        let directory = DbDirectory::new(db.clone(), Some(idp));

        let user = invite_and_store(&directory, &db, "new@x.com").await;
        assert_eq!(user.email, "new@x.com");
        assert!(user.email_verified);
        // Existing users are not registered again.
        let again = directory.invite_user("new@x.com").await.unwrap();
        assert_eq!(again, Invitation::Existing(user));
    }

    #[tokio::test]
    async fn idp_rejection_still_creates_local_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("createUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "email already taken"}]
            })))
            .mount(&server)
            .await;

        let db = setup_db(false).await;
        let idp = Arc::new(IdpClient::new(server.uri(), http()));
        let directory = DbDirectory::new(db.clone(), Some(idp));

        let invitation = directory.invite_user("taken@x.com").await.unwrap();
        assert_eq!(
            invitation,
            Invitation::Pending(NewUser {
                email: "taken@x.com".into(),
                email_verified: false,
            })
        );
    }

    #[tokio::test]
    async fn idp_outage_fails_invite() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let db = setup_db(false).await;
        let idp = Arc::new(IdpClient::new(server.uri(), http()));
        let directory = DbDirectory::new(db.clone(), Some(idp));

        assert!(matches!(
            directory.invite_user("a@x.com").await,
            Err(IssuanceError::IdentityService(_))
        ));
    }

    #[tokio::test]
    async fn db_directory_rolls_back_with_transaction() {
        let db = setup_db(false).await;
        let directory = DbDirectory::new(db.clone(), None);

        let txn = db.begin().await.unwrap();
        let user = directory
            .store_user(
                &txn,
                NewUser {
                    email: "gone@x.com".into(),
                    email_verified: false,
                },
            )
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        assert!(directory.get_user(&user.id).await.unwrap().is_none());
    }

    #[test]
    fn initial_passwords_are_random() {
        let a = initial_password();
        assert_eq!(a.len(), INITIAL_PASSWORD_LEN);
        assert_ne!(a, initial_password());
    }
}
