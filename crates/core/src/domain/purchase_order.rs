use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::vendor::Vendor;
use crate::errors::{DomainError, ValidationError};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PurchaseOrderId(pub String);

impl PurchaseOrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Approved, Rejected and Completed orders have already been decided.
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Completed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self { id: Uuid::new_v4().to_string(), name: name.into(), quantity, unit_price }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    fn check(&self, index: usize) -> Result<(), ValidationError> {
        let reason = if self.name.trim().is_empty() {
            "name is required"
        } else if self.quantity == 0 {
            "quantity must be greater than zero"
        } else if self.unit_price.is_sign_negative() {
            "unit price must not be negative"
        } else {
            return Ok(());
        };
        Err(ValidationError::InvalidItem { index, reason: reason.to_string() })
    }
}

pub fn check_items(items: &[LineItem]) -> Result<(), ValidationError> {
    items.iter().enumerate().try_for_each(|(index, item)| item.check(index))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTerms {
    pub tax_rate: Decimal,
    pub shipping: Decimal,
}

impl Default for PricingTerms {
    fn default() -> Self {
        Self { tax_rate: Decimal::new(10, 2), shipping: Decimal::ZERO }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn compute(items: &[LineItem], pricing: &PricingTerms) -> Self {
        let subtotal: Decimal = items.iter().map(LineItem::line_total).sum();
        let tax = round_money(subtotal * pricing.tax_rate);
        let shipping = pricing.shipping;
        Self { subtotal, tax, shipping, total: subtotal + tax + shipping }
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Caller-supplied fields for a new draft.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub order_number: Option<String>,
    pub site: String,
    pub vendor: Vendor,
    pub items: Vec<LineItem>,
    pub pricing: Option<PricingTerms>,
    pub delivery_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub order_number: String,
    pub site: String,
    pub status: OrderStatus,
    pub vendor: Vendor,
    pub items: Vec<LineItem>,
    pub pricing: PricingTerms,
    pub delivery_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_by: String,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn new_draft(
        input: NewPurchaseOrder,
        default_pricing: &PricingTerms,
        created_by: impl Into<String>,
    ) -> Result<Self, DomainError> {
        check_items(&input.items)?;

        let now = Utc::now();
        let id = PurchaseOrderId::generate();
        let order_number = input
            .order_number
            .filter(|number| !number.trim().is_empty())
            .unwrap_or_else(|| generate_order_number(&id, now));

        Ok(Self {
            id,
            order_number,
            site: input.site,
            status: OrderStatus::Draft,
            vendor: input.vendor,
            items: input.items,
            pricing: input.pricing.unwrap_or_else(|| default_pricing.clone()),
            delivery_date: input.delivery_date,
            payment_terms: input.payment_terms,
            notes: input.notes,
            rejection_reason: None,
            created_by: created_by.into(),
            decided_by: None,
            decided_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn totals(&self) -> Totals {
        Totals::compute(&self.items, &self.pricing)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self.status, next),
            (OrderStatus::Draft, OrderStatus::Pending)
                | (OrderStatus::Pending, OrderStatus::Approved)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                | (OrderStatus::Approved, OrderStatus::Completed)
        )
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidOrderTransition { from: self.status, to: next });
        }

        self.status = next;
        if next != OrderStatus::Rejected {
            self.rejection_reason = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn reject(
        &mut self,
        reason: impl Into<String>,
        decided_by: impl Into<String>,
    ) -> Result<(), DomainError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingRejectionReason.into());
        }

        self.transition_to(OrderStatus::Rejected)?;
        self.rejection_reason = Some(reason);
        self.decided_by = Some(decided_by.into());
        self.decided_at = Some(self.updated_at);
        Ok(())
    }

    pub fn approve(&mut self, decided_by: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(OrderStatus::Approved)?;
        self.decided_by = Some(decided_by.into());
        self.decided_at = Some(self.updated_at);
        Ok(())
    }

    pub fn replace_items(&mut self, items: Vec<LineItem>) -> Result<(), DomainError> {
        self.ensure_editable()?;
        check_items(&items)?;
        self.items = items;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn add_item(&mut self, item: LineItem) -> Result<(), DomainError> {
        self.ensure_editable()?;
        item.check(self.items.len())?;
        self.items.push(item);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: &str) -> Result<bool, DomainError> {
        self.ensure_editable()?;
        let before = self.items.len();
        self.items.retain(|item| item.id != item_id);
        let removed = self.items.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        Ok(removed)
    }

    /// Cross-field rules a stored order must satisfy: a rejection reason exists exactly when
    /// the order is rejected, and a decider is recorded exactly when it has been decided.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let rejected = self.status == OrderStatus::Rejected;
        if rejected != self.rejection_reason.is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "rejection reason present={} for status {}",
                self.rejection_reason.is_some(),
                self.status.as_str()
            )));
        }
        if self.status.is_decided() != self.decided_by.is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "decider present={} for status {}",
                self.decided_by.is_some(),
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub fn is_deletable(&self) -> bool {
        self.status == OrderStatus::Draft
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status == OrderStatus::Draft {
            Ok(())
        } else {
            Err(DomainError::NotEditable { status: self.status })
        }
    }
}

fn generate_order_number(id: &PurchaseOrderId, now: DateTime<Utc>) -> String {
    let suffix: String =
        id.0.chars().filter(char::is_ascii_hexdigit).take(6).collect::<String>().to_uppercase();
    format!("PO-{}-{suffix}", now.format("%Y%m%d"))
}
