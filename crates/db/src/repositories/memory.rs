use std::collections::HashMap;

use tokio::sync::RwLock;

use poflow_core::domain::purchase_order::{OrderStatus, PurchaseOrder, PurchaseOrderId};
use poflow_core::store::{PurchaseOrderStore, StoreError};

#[derive(Default)]
pub struct InMemoryPurchaseOrderRepository {
    orders: RwLock<HashMap<String, PurchaseOrder>>,
}

impl InMemoryPurchaseOrderRepository {
    async fn matching(&self, keep: impl Fn(&PurchaseOrder) -> bool) -> Vec<PurchaseOrder> {
        let orders = self.orders.read().await;
        let mut matched: Vec<PurchaseOrder> =
            orders.values().filter(|po| keep(po)).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matched
    }
}

#[async_trait::async_trait]
impl PurchaseOrderStore for InMemoryPurchaseOrderRepository {
    async fn load(&self, id: &PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn save(&self, po: &PurchaseOrder) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        orders.insert(po.id.0.clone(), po.clone());
        Ok(())
    }

    async fn delete(&self, id: &PurchaseOrderId) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        Ok(orders.remove(&id.0).is_some())
    }

    async fn list_pending(&self) -> Result<Vec<PurchaseOrder>, StoreError> {
        Ok(self.matching(|po| po.status == OrderStatus::Pending).await)
    }

    async fn list_by_site(&self, site: &str) -> Result<Vec<PurchaseOrder>, StoreError> {
        Ok(self.matching(|po| po.site == site).await)
    }
}
