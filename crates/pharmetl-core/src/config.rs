// crates/pharmetl-core/src/config.rs

use sqlx::postgres::PgConnectOptions;

use crate::error::{EtlError, Result};

/// Connection parameters for the destination warehouse.
///
/// Passed explicitly into [`crate::loader::WarehouseLoader::connect`]; there
/// is no process-wide configuration singleton.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Schema holding the star-schema relations.
    pub schema: String,
}

impl WarehouseConfig {
    /// Build a configuration from `PHARMETL_DB_*` environment variables,
    /// falling back to the demo deployment defaults.
    pub fn from_env() -> Result<Self> {
        let port_raw = env_or("PHARMETL_DB_PORT", "5432");
        let port = port_raw
            .parse::<u16>()
            .map_err(|err| EtlError::config(format!("PHARMETL_DB_PORT '{port_raw}': {err}")))?;

        Ok(Self {
            host: env_or("PHARMETL_DB_HOST", "localhost"),
            port,
            database: env_or("PHARMETL_DB_NAME", "pharma_analytics"),
            user: env_or("PHARMETL_DB_USER", "postgres"),
            password: env_or("PHARMETL_DB_PASSWORD", "admin"),
            schema: env_or("PHARMETL_DB_SCHEMA", "pharma"),
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Reject anything that is not a plain lowercase SQL identifier. Schema,
/// table, and column names are interpolated into statement text, so they must
/// never carry quoting or punctuation.
pub(crate) fn check_identifier(kind: &'static str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(EtlError::config(format!(
            "{kind} '{name}' is not a valid identifier"
        )))
    }
}
