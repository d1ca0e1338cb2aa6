use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifacts::{
    Artifact, ArtifactKey, ArtifactSource, ArtifactTier, DocumentRenderer, RenderError,
};
use crate::domain::purchase_order::{PurchaseOrder, PurchaseOrderId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("document render failed for `{po_id}`: {source}")]
    Render { po_id: String, source: RenderError },
}

/// A tier write that failed after the artifact was already available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWarning {
    pub tier: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ArtifactHandle {
    pub artifact: Arc<Artifact>,
    pub source: ArtifactSource,
    pub warnings: Vec<CacheWarning>,
}

/// Read-through cache over an ordered list of tiers, backed by a renderer.
pub struct ArtifactCache {
    tiers: Vec<Arc<dyn ArtifactTier>>,
    renderer: Arc<dyn DocumentRenderer>,
}

impl ArtifactCache {
    pub fn new(tiers: Vec<Arc<dyn ArtifactTier>>, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { tiers, renderer }
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|tier| tier.name().to_string()).collect()
    }

    pub async fn get_or_create(&self, po: &PurchaseOrder) -> Result<ArtifactHandle, CacheError> {
        let key = ArtifactKey::for_order(po);

        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.get(&key).await {
                Ok(Some(artifact)) => {
                    debug!(
                        event_name = "artifact.cache_hit",
                        po_id = %key.po_id,
                        tier = tier.name(),
                        "artifact served from cache"
                    );
                    let warnings = write_through(&self.tiers[..index], &artifact).await;
                    return Ok(ArtifactHandle { artifact, source: tier.source(), warnings });
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        event_name = "artifact.tier_read_failed",
                        po_id = %key.po_id,
                        tier = tier.name(),
                        error = %error,
                        "treating tier read failure as a miss"
                    );
                }
            }
        }

        let rendered = self
            .renderer
            .render(po)
            .await
            .map_err(|source| CacheError::Render { po_id: po.id.0.clone(), source })?;
        let artifact = Arc::new(Artifact {
            key,
            content_type: rendered.content_type,
            bytes: rendered.bytes,
            generated_at: Utc::now(),
        });
        debug!(
            event_name = "artifact.rendered",
            po_id = %artifact.key.po_id,
            bytes = artifact.bytes.len(),
            "artifact rendered"
        );

        let warnings = write_through(&self.tiers, &artifact).await;
        Ok(ArtifactHandle { artifact, source: ArtifactSource::Rendered, warnings })
    }

    /// Drops every cached version of an order. Failures are logged and returned as warnings.
    pub async fn invalidate(&self, po_id: &PurchaseOrderId) -> Vec<CacheWarning> {
        let mut warnings = Vec::new();
        for tier in &self.tiers {
            if let Err(error) = tier.evict(po_id).await {
                warn!(
                    event_name = "artifact.tier_evict_failed",
                    po_id = %po_id,
                    tier = tier.name(),
                    error = %error,
                    "artifact eviction failed"
                );
                warnings.push(CacheWarning { tier: tier.name().to_string(), message: error.to_string() });
            }
        }
        warnings
    }
}

async fn write_through(tiers: &[Arc<dyn ArtifactTier>], artifact: &Arc<Artifact>) -> Vec<CacheWarning> {
    let mut warnings = Vec::new();
    for tier in tiers {
        if let Err(error) = tier.put(Arc::clone(artifact)).await {
            warn!(
                event_name = "artifact.cache_write_failed",
                po_id = %artifact.key.po_id,
                tier = tier.name(),
                error = %error,
                "artifact cache write failed"
            );
            warnings.push(CacheWarning { tier: tier.name().to_string(), message: error.to_string() });
        }
    }
    warnings
}
