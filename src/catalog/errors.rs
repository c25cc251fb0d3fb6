//! Catalog error types

use thiserror::Error;

use crate::error::{CoreError, CoreErrorCode};

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors surfaced by the catalog layer
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("no rows matched [{0}]")]
    NoRowsFound(String),

    #[error("row already present [{0}]")]
    AlreadyPresent(String),

    #[error("catalog driver error: {0}")]
    Driver(String),

    #[error("catalog connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("invalid catalog input: {0}")]
    InvalidInput(String),
}

impl From<CatalogError> for CoreError {
    fn from(e: CatalogError) -> Self {
        let code = match &e {
            CatalogError::NoRowsFound(_) => CoreErrorCode::CatalogNoRowsFound,
            CatalogError::AlreadyPresent(_) => CoreErrorCode::CatalogAlreadyHasItem,
            CatalogError::Driver(_) => CoreErrorCode::CatalogLibraryError,
            CatalogError::ConnectionUnavailable(_) => CoreErrorCode::CatalogConnectionError,
            CatalogError::InvalidInput(_) => CoreErrorCode::InvalidInputParam,
        };
        CoreError::new(code, e.to_string())
    }
}
