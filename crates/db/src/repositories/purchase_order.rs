use async_trait::async_trait;
use sqlx::Row;

use poflow_core::domain::purchase_order::{PurchaseOrder, PurchaseOrderId};
use poflow_core::store::{PurchaseOrderStore, StoreError};

use super::{decode_err, RepositoryError};
use crate::DbPool;

/// Stores each order as one JSON document with its status and site lifted into indexed columns.
pub struct SqlPurchaseOrderRepository {
    pool: DbPool,
}

impl SqlPurchaseOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find(&self, id: &PurchaseOrderId) -> Result<Option<PurchaseOrder>, RepositoryError> {
        let row = sqlx::query("SELECT id, document FROM purchase_order WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_purchase_order).transpose()
    }

    async fn upsert(&self, po: &PurchaseOrder) -> Result<(), RepositoryError> {
        let document = serde_json::to_string(po).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO purchase_order (id, order_number, site, status, document, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                order_number = excluded.order_number,
                site = excluded.site,
                status = excluded.status,
                document = excluded.document,
                updated_at = excluded.updated_at",
        )
        .bind(&po.id.0)
        .bind(&po.order_number)
        .bind(&po.site)
        .bind(po.status.as_str())
        .bind(document)
        .bind(po.created_at.to_rfc3339())
        .bind(po.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: &PurchaseOrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM purchase_order WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let sql = format!(
            "SELECT id, document FROM purchase_order WHERE {column} = ? ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql).bind(value).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_purchase_order).collect()
    }
}

fn row_to_purchase_order(row: &sqlx::sqlite::SqliteRow) -> Result<PurchaseOrder, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let document: String = row.try_get("document").map_err(decode_err)?;
    let po: PurchaseOrder = serde_json::from_str(&document)
        .map_err(|e| RepositoryError::Decode(format!("purchase order {id}: {e}")))?;
    if po.id.0 != id {
        return Err(RepositoryError::Decode(format!(
            "purchase order row {id} holds document for {}",
            po.id.0
        )));
    }
    Ok(po)
}

#[async_trait]
impl PurchaseOrderStore for SqlPurchaseOrderRepository {
    async fn load(&self, id: &PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        Ok(self.find(id).await?)
    }

    async fn save(&self, po: &PurchaseOrder) -> Result<(), StoreError> {
        Ok(self.upsert(po).await?)
    }

    async fn delete(&self, id: &PurchaseOrderId) -> Result<bool, StoreError> {
        Ok(self.remove(id).await?)
    }

    async fn list_pending(&self) -> Result<Vec<PurchaseOrder>, StoreError> {
        Ok(self.list_where("status", "pending").await?)
    }

    async fn list_by_site(&self, site: &str) -> Result<Vec<PurchaseOrder>, StoreError> {
        Ok(self.list_where("site", site).await?)
    }
}
