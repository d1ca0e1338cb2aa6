use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};

use poflow_core::artifacts::{
    storage_key, Artifact, ArtifactKey, ArtifactSource, ArtifactTier, TierError,
};
use poflow_core::domain::purchase_order::PurchaseOrderId;

pub const VERSION_HEADER: &str = "x-artifact-version";

/// Remote object store addressed as `<base_url>/artifacts/po:<id>`. Like the durable tier
/// it keeps one version per order; the stored version travels in `x-artifact-version`.
pub struct HttpArtifactTier {
    base_url: String,
    client: Client,
}

impl HttpArtifactTier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TierError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TierError::Unavailable(e.to_string()))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client })
    }

    fn url(&self, po_id: &PurchaseOrderId) -> String {
        format!("{}/artifacts/{}", self.base_url, storage_key(po_id))
    }
}

fn status_error(status: StatusCode) -> TierError {
    match status {
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYLOAD_TOO_LARGE => {
            TierError::QuotaExceeded(format!("remote store answered {status}"))
        }
        _ => TierError::Unavailable(format!("remote store answered {status}")),
    }
}

#[async_trait]
impl ArtifactTier for HttpArtifactTier {
    fn name(&self) -> &str {
        "remote"
    }

    fn source(&self) -> ArtifactSource {
        ArtifactSource::Remote
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, TierError> {
        let response = self
            .client
            .get(self.url(&key.po_id))
            .send()
            .await
            .map_err(|e| TierError::Io(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let stored_version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if stored_version.as_deref() != Some(key.version.as_str()) {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| TierError::Io(e.to_string()))?;

        Ok(Some(Arc::new(Artifact {
            key: key.clone(),
            content_type,
            bytes: bytes.to_vec(),
            generated_at: Utc::now(),
        })))
    }

    async fn put(&self, artifact: Arc<Artifact>) -> Result<(), TierError> {
        let response = self
            .client
            .put(self.url(&artifact.key.po_id))
            .header(VERSION_HEADER, artifact.key.version.as_str())
            .header(CONTENT_TYPE, artifact.content_type.as_str())
            .body(artifact.bytes.clone())
            .send()
            .await
            .map_err(|e| TierError::Io(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response.status()))
        }
    }

    async fn evict(&self, po_id: &PurchaseOrderId) -> Result<(), TierError> {
        let response = self
            .client
            .delete(self.url(po_id))
            .send()
            .await
            .map_err(|e| TierError::Io(e.to_string()))?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(status_error(status)),
        }
    }
}
