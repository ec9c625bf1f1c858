use config::{Config, Environment, File};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::keys::{DEFAULT_KEY_TTL, SigningMethod};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// What to do with application-defined scopes when no policy service is configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnvalidatedScopes {
    /// Pass non-standard scopes through unchanged.
    #[default]
    Allow,
    /// Reject any request carrying non-standard scopes.
    Deny,
}

/// A statically registered OAuth2 client.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Identity directory (GraphQL). When absent, users live in the local database.
    #[serde(default)]
    pub id_url: Option<String>,
    /// Identity provider auth service (GraphQL `login` / `createUser`).
    #[serde(default)]
    pub idp_url: Option<String>,
    /// Optional OAuth2 password-grant token endpoint of the identity provider.
    #[serde(default)]
    pub idp_token_url: Option<String>,
    #[serde(default)]
    pub idp_client_id: Option<String>,
    #[serde(default)]
    pub idp_client_secret: Option<String>,
    /// Remote JWKS holding the private signing key. When absent a key is generated locally.
    #[serde(default)]
    pub jwks_provider_url: Option<String>,
    #[serde(default)]
    pub user_scope_validator_url: Option<String>,
    #[serde(default)]
    pub unvalidated_scopes: UnvalidatedScopes,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_expire_in")]
    pub access_token_expire_in: u64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_token_expire_in")]
    pub refresh_token_expire_in: u64,
    #[serde(default = "default_signing_method")]
    pub signing_method: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Signing key cache lifetime in seconds
    #[serde(default = "default_key_cache_ttl")]
    pub key_cache_ttl: u64,
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
    /// Per-request network timeout for remote collaborators, in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout: u64,
    /// Upper bound for one token request, authentication included, in seconds
    #[serde(default = "default_issuance_deadline")]
    pub issuance_deadline: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    /// A list of `{id, secret}` entries, or `id:secret` pairs separated by commas.
    #[serde(default = "default_clients", deserialize_with = "deserialize_clients")]
    pub clients: Vec<ClientConfig>,
}

fn default_access_token_expire_in() -> u64 {
    7200
}

fn default_refresh_token_expire_in() -> u64 {
    86400 * 7
}

fn default_signing_method() -> String {
    "RS256".to_string()
}

fn default_issuer() -> String {
    "http://localhost".to_string()
}

fn default_key_cache_ttl() -> u64 {
    DEFAULT_KEY_TTL.as_secs()
}

fn default_key_bits() -> usize {
    2048
}

fn default_network_timeout() -> u64 {
    10
}

fn default_issuance_deadline() -> u64 {
    30
}

fn default_port() -> u16 {
    80
}

fn default_clients() -> Vec<ClientConfig> {
    vec![ClientConfig {
        id: "default".to_string(),
        secret: "default".to_string(),
    }]
}

fn deserialize_clients<'de, D>(deserializer: D) -> Result<Vec<ClientConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Clients {
        List(Vec<ClientConfig>),
        Inline(String),
    }

    match Clients::deserialize(deserializer)? {
        Clients::List(clients) => Ok(clients),
        Clients::Inline(pairs) => pairs
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                pair.split_once(':')
                    .map(|(id, secret)| ClientConfig {
                        id: id.to_string(),
                        secret: secret.to_string(),
                    })
                    .ok_or_else(|| D::Error::custom(format!("client {pair:?} is not id:secret")))
            })
            .collect(),
    }
}

impl AppConfig {
    /// Reject settings that would only fail later at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signing_method
            .parse::<SigningMethod>()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if self.access_token_expire_in == 0 {
            return Err(ConfigError::Validation(
                "access_token_expire_in must be > 0".into(),
            ));
        }
        if self.issuance_deadline == 0 {
            return Err(ConfigError::Validation(
                "issuance_deadline must be > 0".into(),
            ));
        }
        if self.key_cache_ttl == 0 {
            return Err(ConfigError::Validation("key_cache_ttl must be > 0".into()));
        }
        if self.key_bits < 2048 {
            return Err(ConfigError::Validation(
                "key_bits must be at least 2048".into(),
            ));
        }
        if self.idp_token_url.is_some() && self.idp_client_id.is_none() {
            return Err(ConfigError::Validation(
                "idp_client_id is required when idp_token_url is set".into(),
            ));
        }
        Ok(())
    }

    pub fn client(&self, id: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.id == id)
    }
}

/// Load application configuration from an optional `config.yaml` + environment overrides.
///
/// Environment variables override file values using their lower-cased name
/// (`ID_URL` → `id_url`); nested keys use a double underscore separator.
/// `CLIENTS` takes the `id:secret,id2:secret2` form.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_with(Environment::default().separator("__"))
}

fn load_config_with(environment: Environment) -> Result<AppConfig, ConfigError> {
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(environment)
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_yaml(yaml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = from_yaml(r#"database_url: "sqlite::memory:""#);
        assert_eq!(cfg.access_token_expire_in, 7200);
        assert_eq!(cfg.refresh_token_expire_in, 604800);
        assert_eq!(cfg.signing_method, "RS256");
        assert_eq!(cfg.issuance_deadline, 30);
        assert_eq!(cfg.unvalidated_scopes, UnvalidatedScopes::Allow);
        assert!(cfg.jwks_provider_url.is_none());
        assert!(cfg.client("default").is_some());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_signing_method() {
        let cfg = from_yaml(
            r#"
database_url: "sqlite::memory:"
signing_method: "XX999"
"#,
        );
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn deny_mode_parses() {
        let cfg = from_yaml(
            r#"
database_url: "sqlite::memory:"
unvalidated_scopes: deny
"#,
        );
        assert_eq!(cfg.unvalidated_scopes, UnvalidatedScopes::Deny);
    }

    #[test]
    fn token_url_requires_client_id() {
        let cfg = from_yaml(
            r#"
database_url: "sqlite::memory:"
idp_token_url: "http://idp/token"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn clients_from_environment_string() {
        let vars: config::Map<String, String> = [
            ("DATABASE_URL", "sqlite::memory:"),
            ("CLIENTS", "web:one, cli:two"),
            ("ISSUANCE_DEADLINE", "5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg = load_config_with(Environment::default().separator("__").source(Some(vars)))
            .unwrap();
        assert_eq!(cfg.clients.len(), 2);
        assert_eq!(cfg.client("web").unwrap().secret, "one");
        assert_eq!(cfg.client("cli").unwrap().secret, "two");
        assert!(cfg.client("default").is_none());
        assert_eq!(cfg.issuance_deadline, 5);
    }

    #[test]
    fn malformed_client_string_is_rejected() {
        let result = Config::builder()
            .set_override("database_url", "sqlite::memory:")
            .unwrap()
            .set_override("clients", "no-secret-here")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let cfg = from_yaml(
            r#"
database_url: "sqlite::memory:"
issuance_deadline: 0
"#,
        );
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
