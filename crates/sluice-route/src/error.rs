//! Error types for sluice-route

use thiserror::Error;

/// Result type for sluice-route operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading data to route
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the database layer
    #[error(transparent)]
    Database(#[from] sluice_rdbc::Error),

    /// A result row could not be turned into a data record
    #[error("data format error: {message}")]
    DataFormat {
        /// What was wrong with the row
        message: String,
    },

    /// The SQL template provider has no template under this name
    #[error("no SQL template named '{name}'")]
    MissingTemplate {
        /// Requested template name
        name: String,
    },

    /// Invalid configuration value
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem
        message: String,
    },

    /// Configuration failed declarative validation
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl Error {
    /// Create a data format error
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the database rejected the statement shape itself
    pub fn is_malformed_query(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_malformed_query())
    }
}
