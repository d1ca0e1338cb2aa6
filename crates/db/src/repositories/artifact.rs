use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use poflow_core::artifacts::{
    storage_key, Artifact, ArtifactKey, ArtifactSource, ArtifactTier, TierError,
};
use poflow_core::domain::purchase_order::PurchaseOrderId;

use super::{decode_err, RepositoryError};
use crate::DbPool;

/// Durable artifact tier. Keeps only the latest version per order under `po:<id>`.
pub struct SqlArtifactTier {
    pool: DbPool,
}

impl SqlArtifactTier {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &ArtifactKey) -> Result<Option<Artifact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT po_id, version, content_type, bytes, generated_at
             FROM po_artifact WHERE storage_key = ?",
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let artifact = row_to_artifact(&row)?;
        if artifact.key.version != key.version {
            debug!(
                event_name = "artifact.durable.stale",
                po_id = %key.po_id,
                stored_version = %artifact.key.version,
                "stored artifact version does not match request"
            );
            return Ok(None);
        }
        Ok(Some(artifact))
    }

    async fn store(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO po_artifact (storage_key, po_id, version, content_type, bytes, generated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(storage_key) DO UPDATE SET
                version = excluded.version,
                content_type = excluded.content_type,
                bytes = excluded.bytes,
                generated_at = excluded.generated_at",
        )
        .bind(artifact.key.storage_key())
        .bind(&artifact.key.po_id.0)
        .bind(&artifact.key.version)
        .bind(&artifact.content_type)
        .bind(&artifact.bytes)
        .bind(artifact.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, po_id: &PurchaseOrderId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM po_artifact WHERE storage_key = ?")
            .bind(storage_key(po_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> Result<Artifact, RepositoryError> {
    let po_id: String = row.try_get("po_id").map_err(decode_err)?;
    let version: String = row.try_get("version").map_err(decode_err)?;
    let content_type: String = row.try_get("content_type").map_err(decode_err)?;
    let bytes: Vec<u8> = row.try_get("bytes").map_err(decode_err)?;
    let generated_at_str: String = row.try_get("generated_at").map_err(decode_err)?;

    let generated_at = DateTime::parse_from_rfc3339(&generated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Artifact {
        key: ArtifactKey { po_id: PurchaseOrderId(po_id), version },
        content_type,
        bytes,
        generated_at,
    })
}

#[async_trait]
impl ArtifactTier for SqlArtifactTier {
    fn name(&self) -> &str {
        "durable"
    }

    fn source(&self) -> ArtifactSource {
        ArtifactSource::Durable
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, TierError> {
        Ok(self.fetch(key).await?.map(Arc::new))
    }

    async fn put(&self, artifact: Arc<Artifact>) -> Result<(), TierError> {
        Ok(self.store(&artifact).await?)
    }

    async fn evict(&self, po_id: &PurchaseOrderId) -> Result<(), TierError> {
        Ok(self.remove(po_id).await?)
    }
}
