use super::idp::IdpClient;
use super::resolver::IdentityResolver;
use crate::error::IssuanceError;
use std::sync::Arc;
use tracing::debug;

/// Provider type recorded on account links created by password logins.
pub const IDP_PROVIDER: &str = "idp";

/// Resource-owner password credentials checked against the identity provider.
pub struct PasswordAuthenticator {
    idp: Arc<IdpClient>,
    identities: Arc<IdentityResolver>,
}

impl PasswordAuthenticator {
    pub fn new(idp: Arc<IdpClient>, identities: Arc<IdentityResolver>) -> Self {
        Self { idp, identities }
    }

    /// Canonical user id for the credentials, `None` when no provider accepts them.
    ///
    /// The OIDC password grant is tried first when configured, then the GraphQL login.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, IssuanceError> {
        let mut idp_user = self.idp.login_with_password_grant(username, password).await?;
        if idp_user.is_none() {
            idp_user = self.idp.login(username, password).await?;
        }

        let Some(idp_user) = idp_user else {
            debug!("credentials rejected by identity provider");
            return Ok(None);
        };
        let user = self
            .identities
            .get_or_create_user(&idp_user.id, username, IDP_PROVIDER)
            .await?;
        Ok(Some(user.id))
    }
}
