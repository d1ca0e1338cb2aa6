use poflow_core::domain::purchase_order::{PurchaseOrder, PurchaseOrderId};
use poflow_core::errors::{ApplicationError, InterfaceError};
use poflow_core::store::PurchaseOrderStore;
use poflow_db::{connect_from_config, migrations, SqlPurchaseOrderRepository};
use serde::Serialize;
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Serialize)]
struct OrderSummary {
    id: String,
    order_number: String,
    site: String,
    status: &'static str,
    vendor: String,
    total: String,
    updated_at: String,
}

impl From<&PurchaseOrder> for OrderSummary {
    fn from(po: &PurchaseOrder) -> Self {
        Self {
            id: po.id.0.clone(),
            order_number: po.order_number.clone(),
            site: po.site.clone(),
            status: po.status.as_str(),
            vendor: po.vendor.name.clone(),
            total: format!("{:.2}", po.totals().total),
            updated_at: po.updated_at.to_rfc3339(),
        }
    }
}

/// Which orders a run reports.
#[derive(Clone, Copy, Debug)]
pub enum OrderQuery<'a> {
    Pending,
    Site(&'a str),
    Id(&'a str),
}

impl OrderQuery<'_> {
    fn scope(&self) -> String {
        match self {
            Self::Pending => "pending approval".to_string(),
            Self::Site(site) => format!("site `{site}`"),
            Self::Id(id) => format!("id `{id}`"),
        }
    }
}

enum Failure {
    Setup { error_class: &'static str, message: String, exit_code: u8 },
    Lookup(ApplicationError),
}

pub fn run(query: OrderQuery<'_>) -> CommandResult {
    let config = match load_config("orders") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("orders") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database).await.map_err(|error| Failure::Setup {
            error_class: "db_connectivity",
            message: error.to_string(),
            exit_code: 4,
        })?;
        migrations::run_pending(&pool).await.map_err(|error| Failure::Setup {
            error_class: "migration",
            message: error.to_string(),
            exit_code: 5,
        })?;

        let repository = SqlPurchaseOrderRepository::new(pool.clone());
        let orders = find(&repository, query).await.map_err(Failure::Lookup);
        pool.close().await;
        orders
    });

    match result {
        Ok(orders) => {
            let summaries: Vec<OrderSummary> = orders.iter().map(OrderSummary::from).collect();
            CommandResult::success_with_data(
                "orders",
                format!("{} purchase orders ({})", summaries.len(), query.scope()),
                json!({ "orders": summaries }),
            )
        }
        Err(Failure::Setup { error_class, message, exit_code }) => {
            CommandResult::failure("orders", error_class, message, exit_code)
        }
        Err(Failure::Lookup(error)) => {
            let interface = error.into_interface(format!("cli-orders-{}", std::process::id()));
            CommandResult::from_interface("orders", &interface, exit_code(&interface))
        }
    }
}

async fn find(
    repository: &SqlPurchaseOrderRepository,
    query: OrderQuery<'_>,
) -> Result<Vec<PurchaseOrder>, ApplicationError> {
    match query {
        OrderQuery::Pending => Ok(repository.list_pending().await?),
        OrderQuery::Site(site) => Ok(repository.list_by_site(site).await?),
        OrderQuery::Id(id) => {
            let id = PurchaseOrderId(id.to_string());
            let po = repository
                .load(&id)
                .await?
                .ok_or_else(|| ApplicationError::NotFound(id.0.clone()))?;
            Ok(vec![po])
        }
    }
}

fn exit_code(error: &InterfaceError) -> u8 {
    match error {
        InterfaceError::NotFound { .. } => 8,
        InterfaceError::BadRequest { .. } => 9,
        InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => 7,
    }
}
