//! Schema migration CLI.
//!
//! The database is picked like the server picks it: `DATABASE_URL` first, then
//! `database_url` from an optional `config.yaml` in the working directory.

use config::{Config, ConfigError, File};
use sea_orm_migration::prelude::*;
use std::env;

fn load_settings() -> Result<Config, ConfigError> {
    Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .build()
}

fn configured_database_url(settings: &Config) -> Option<String> {
    settings
        .get_string("database_url")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

#[tokio::main]
async fn main() {
    if env::var_os("DATABASE_URL").is_none() {
        match load_settings() {
            Ok(settings) => {
                if let Some(url) = configured_database_url(&settings) {
                    env::set_var("DATABASE_URL", url);
                }
            }
            Err(e) => {
                eprintln!("Failed to read config.yaml: {e}");
                std::process::exit(1);
            }
        }
    }
    cli::run_cli(migration::Migrator).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn settings(yaml: &str) -> Config {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
    }

    #[test]
    fn reads_database_url_from_config() {
        let settings = settings("database_url: \"sqlite://auth.db?mode=rwc\"\nport: 8080\n");
        assert_eq!(
            configured_database_url(&settings).as_deref(),
            Some("sqlite://auth.db?mode=rwc")
        );
    }

    #[test]
    fn blank_or_missing_url_is_ignored() {
        assert!(configured_database_url(&settings("database_url: \"  \"\n")).is_none());
        assert!(configured_database_url(&settings("port: 8080\n")).is_none());
    }
}
