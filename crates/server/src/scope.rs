//! Scope partitioning and delegation of application scopes to a policy service.

use crate::config::UnvalidatedScopes;
use crate::error::IssuanceError;
use crate::graphql::{GraphQlClient, vars};
use serde::Deserialize;
use tracing::{debug, warn};

pub const OPENID: &str = "openid";
pub const PROFILE: &str = "profile";
pub const EMAIL: &str = "email";

const STANDARD_SCOPES: [&str; 3] = [OPENID, PROFILE, EMAIL];

const VALIDATE_USER_SCOPE_QUERY: &str = r#"
query($userID: ID, $scope: String) {
    result: validateUserScope(user: $userID, scope: $scope) {
        valid
        scopes
    }
}
"#;

/// Whether `scope` (space delimited) contains `wanted`.
pub fn has_scope(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|s| s == wanted)
}

/// A requested scope string split into standard and application scopes.
///
/// Each half keeps request order; repeated tokens are kept once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeSplit {
    pub standard: Vec<String>,
    pub custom: Vec<String>,
}

impl ScopeSplit {
    pub fn parse(requested: &str) -> Self {
        let mut split = ScopeSplit::default();
        for token in requested.split_whitespace() {
            let bucket = if STANDARD_SCOPES.contains(&token) {
                &mut split.standard
            } else {
                &mut split.custom
            };
            if !bucket.iter().any(|s| s == token) {
                bucket.push(token.to_string());
            }
        }
        split
    }

    pub fn join(&self) -> String {
        self.standard
            .iter()
            .chain(self.custom.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Who decides on application scopes.
pub enum ScopePolicy {
    /// GraphQL `validateUserScope` service.
    Remote(GraphQlClient),
    /// No service; application scopes pass through.
    AllowUnvalidated,
    /// No service; any application scope is refused.
    DenyUnvalidated,
}

impl ScopePolicy {
    pub fn from_config(client: Option<GraphQlClient>, fallback: UnvalidatedScopes) -> Self {
        match (client, fallback) {
            (Some(client), _) => ScopePolicy::Remote(client),
            (None, UnvalidatedScopes::Allow) => ScopePolicy::AllowUnvalidated,
            (None, UnvalidatedScopes::Deny) => ScopePolicy::DenyUnvalidated,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScopeVerdict {
    valid: bool,
    #[serde(default)]
    scopes: Option<String>,
}

pub struct ScopeAuthorizer {
    policy: ScopePolicy,
}

impl ScopeAuthorizer {
    pub fn new(policy: ScopePolicy) -> Self {
        Self { policy }
    }

    /// Granted scope for `user_id`: standard scopes first, then the application
    /// scopes the policy accepted.
    #[tracing::instrument(skip(self))]
    pub async fn authorize(&self, requested: &str, user_id: &str) -> Result<String, IssuanceError> {
        let mut split = ScopeSplit::parse(requested);
        if split.custom.is_empty() {
            return Ok(requested.to_string());
        }
        let custom = split.custom.join(" ");

        split.custom = match &self.policy {
            ScopePolicy::AllowUnvalidated => {
                debug!(scope = %custom, "no scope policy configured, passing scopes through");
                return Ok(split.join());
            }
            ScopePolicy::DenyUnvalidated => {
                return Err(IssuanceError::ScopeDenied(format!(
                    "no scope policy configured for {custom}"
                )));
            }
            ScopePolicy::Remote(client) => {
                let verdict = client
                    .run::<ScopeVerdict>(
                        VALIDATE_USER_SCOPE_QUERY,
                        vars([("userID", user_id), ("scope", custom.as_str())]),
                    )
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "scope policy call failed");
                        IssuanceError::ScopeDenied(format!("scope policy unavailable: {e}"))
                    })?
                    .ok_or_else(|| IssuanceError::ScopeDenied("scope policy returned no verdict".into()))?;
                if !verdict.valid {
                    return Err(IssuanceError::ScopeDenied(format!("invalid scopes: {custom}")));
                }
                match verdict.scopes {
                    // The policy may only narrow: anything it names that was not requested is dropped.
                    Some(narrowed) => {
                        let mut granted: Vec<String> = Vec::new();
                        for scope in narrowed.split_whitespace() {
                            if !split.custom.iter().any(|c| c == scope) {
                                debug!(%scope, "ignoring scope the policy did not receive");
                                continue;
                            }
                            if !granted.iter().any(|g| g == scope) {
                                granted.push(scope.to_string());
                            }
                        }
                        granted
                    }
                    None => split.custom,
                }
            }
        };
        Ok(split.join())
    }
}
