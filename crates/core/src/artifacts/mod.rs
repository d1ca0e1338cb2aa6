//! Generated purchase-order documents and the tiers they are cached in.
//!
//! An artifact is addressed by `(po_id, version)` where the version is a content hash of
//! everything the rendered document shows. Tiers share one `get/put/evict` interface and
//! are consulted in order by [`cache::ArtifactCache`].

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::purchase_order::{
    LineItem, OrderStatus, PricingTerms, PurchaseOrder, PurchaseOrderId, Totals,
};
use crate::domain::vendor::Vendor;

pub use cache::{ArtifactCache, ArtifactHandle, CacheError, CacheWarning};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub po_id: PurchaseOrderId,
    pub version: String,
}

impl ArtifactKey {
    pub fn for_order(po: &PurchaseOrder) -> Self {
        Self { po_id: po.id.clone(), version: version_tag(po) }
    }

    /// Key used by stores that keep a single version per order.
    pub fn storage_key(&self) -> String {
        storage_key(&self.po_id)
    }
}

pub fn storage_key(po_id: &PurchaseOrderId) -> String {
    format!("po:{}", po_id.0)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Memory,
    Durable,
    Remote,
    Rendered,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("io error: {0}")]
    Io(String),
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, po: &PurchaseOrder) -> Result<RenderedDocument, RenderError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TierError {
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("tier unavailable: {0}")]
    Unavailable(String),
    #[error("tier io failure: {0}")]
    Io(String),
}

#[async_trait]
pub trait ArtifactTier: Send + Sync {
    fn name(&self) -> &str;
    fn source(&self) -> ArtifactSource;
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, TierError>;
    async fn put(&self, artifact: Arc<Artifact>) -> Result<(), TierError>;
    async fn evict(&self, po_id: &PurchaseOrderId) -> Result<(), TierError>;
}

/// Process-local tier. Holds every version it has seen until evicted or restarted.
#[derive(Default)]
pub struct MemoryTier {
    artifacts: RwLock<HashMap<ArtifactKey, Arc<Artifact>>>,
}

impl MemoryTier {
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    fn source(&self) -> ArtifactSource {
        ArtifactSource::Memory
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, TierError> {
        Ok(self.artifacts.read().await.get(key).cloned())
    }

    async fn put(&self, artifact: Arc<Artifact>) -> Result<(), TierError> {
        self.artifacts.write().await.insert(artifact.key.clone(), artifact);
        Ok(())
    }

    async fn evict(&self, po_id: &PurchaseOrderId) -> Result<(), TierError> {
        self.artifacts.write().await.retain(|key, _| &key.po_id != po_id);
        Ok(())
    }
}

#[derive(Serialize)]
struct VersionMaterial<'a> {
    order_number: &'a str,
    status: OrderStatus,
    vendor: &'a Vendor,
    items: &'a [LineItem],
    pricing: &'a PricingTerms,
    totals: Totals,
    delivery_date: Option<NaiveDate>,
    payment_terms: Option<&'a str>,
    notes: Option<&'a str>,
    rejection_reason: Option<&'a str>,
}

/// Hex SHA-256 over the canonical JSON of every field a rendered document shows.
pub fn version_tag(po: &PurchaseOrder) -> String {
    let material = VersionMaterial {
        order_number: &po.order_number,
        status: po.status,
        vendor: &po.vendor,
        items: &po.items,
        pricing: &po.pricing,
        totals: po.totals(),
        delivery_date: po.delivery_date,
        payment_terms: po.payment_terms.as_deref(),
        notes: po.notes.as_deref(),
        rejection_reason: po.rejection_reason.as_deref(),
    };
    let canonical_payload = match serde_json::to_vec(&material) {
        Ok(payload) => payload,
        Err(_) => po.id.0.as_bytes().to_vec(),
    };
    encode_hex(Sha256::digest(&canonical_payload).as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
