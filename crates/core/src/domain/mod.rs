pub mod purchase_order;
pub mod vendor;
