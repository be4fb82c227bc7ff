use thiserror::Error;

/// Top-level error type for the catalog.
///
/// Validation and not-found variants are recoverable conditions the
/// presentation layer turns into messages. `Engine`, `DecryptionFailed`
/// and `Io` abort the current operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Table not found: '{0}'")]
    TableNotFound(String),

    #[error("Name conflict: '{0}'")]
    NameConflict(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Failed to decrypt store: incorrect password or corrupted file")]
    DecryptionFailed,

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Whether the caller can recover by re-prompting or correcting input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CatalogError::InvalidIdentifier(_)
                | CatalogError::TableNotFound(_)
                | CatalogError::NameConflict(_)
                | CatalogError::InvalidFilter(_)
        )
    }
}

impl From<toml::de::Error> for CatalogError {
    fn from(err: toml::de::Error) -> Self {
        CatalogError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CatalogError {
    fn from(err: toml::ser::Error) -> Self {
        CatalogError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
