// crates/pharmetl-core/src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("failed to connect to warehouse database '{database}': {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to extract '{path}': {message}")]
    Extraction { path: String, message: String },

    #[error("{operation} failed for table '{table}': {message}")]
    Load {
        table: String,
        operation: &'static str,
        message: String,
    },

    #[error("invalid warehouse configuration: {message}")]
    Config { message: String },
}

impl EtlError {
    pub(crate) fn extraction(path: impl Into<String>, message: impl ToString) -> Self {
        EtlError::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn load(
        table: impl Into<String>,
        operation: &'static str,
        message: impl ToString,
    ) -> Self {
        EtlError::Load {
            table: table.into(),
            operation,
            message: message.to_string(),
        }
    }

    pub(crate) fn config(message: impl ToString) -> Self {
        EtlError::Config {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
