use thiserror::Error;

use poflow_core::artifacts::TierError;
use poflow_core::store::StoreError;

pub mod artifact;
pub mod memory;
pub mod purchase_order;

pub use artifact::SqlArtifactTier;
pub use memory::InMemoryPurchaseOrderRepository;
pub use purchase_order::SqlPurchaseOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Backend(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}

impl From<RepositoryError> for TierError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(sqlx::Error::Database(error))
                if error.message().contains("full") =>
            {
                Self::QuotaExceeded(error.message().to_string())
            }
            RepositoryError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) => {
                Self::Unavailable("database pool unavailable".to_string())
            }
            other => Self::Io(other.to_string()),
        }
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
