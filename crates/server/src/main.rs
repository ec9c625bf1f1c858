use oauth_server::AppState;
use oauth_server::api::start_webserver;
use oauth_server::config::load_config_or_panic;
use rustls::crypto;
use rustls::crypto::CryptoProvider;
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "oauth_server=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    let config = Arc::new(load_config_or_panic());

    // Outbound TLS for the JWKS provider, directory and identity provider.
    let ring_provider = crypto::ring::default_provider();
    CryptoProvider::install_default(ring_provider)
        .map_err(|_| color_eyre::eyre::eyre!("Failed to install crypto provider"))?;

    let db = Arc::new(Database::connect(&config.database_url).await?);

    let state = AppState::from_config(config.clone(), db)?;

    start_webserver(state, config.port).await?;
    Ok(())
}
