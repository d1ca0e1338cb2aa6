use async_trait::async_trait;
use thiserror::Error;

use crate::domain::purchase_order::{PurchaseOrder, PurchaseOrderId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("stored purchase order could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

/// Durable home of purchase orders. `save` replaces the whole order atomically.
#[async_trait]
pub trait PurchaseOrderStore: Send + Sync {
    async fn load(&self, id: &PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError>;
    async fn save(&self, po: &PurchaseOrder) -> Result<(), StoreError>;
    async fn delete(&self, id: &PurchaseOrderId) -> Result<bool, StoreError>;
    async fn list_pending(&self) -> Result<Vec<PurchaseOrder>, StoreError>;
    async fn list_by_site(&self, site: &str) -> Result<Vec<PurchaseOrder>, StoreError>;
}
