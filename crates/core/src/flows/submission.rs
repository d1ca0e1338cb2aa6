use crate::domain::purchase_order::{check_items, PurchaseOrder};
use crate::errors::ValidationError;

/// Checks the preconditions for leaving Draft, in order, stopping at the first failure.
///
/// Vendor email and phone are deliberately not checked here: missing values are
/// synthesized by [`crate::domain::vendor::Vendor::repair_contact`] once everything
/// else passes.
pub fn check_submission(po: &PurchaseOrder) -> Result<(), ValidationError> {
    if !po.vendor.has_name() {
        return Err(ValidationError::MissingVendorName);
    }
    if po.items.is_empty() {
        return Err(ValidationError::EmptyItems);
    }
    check_items(&po.items)?;
    if po.delivery_date.is_none() {
        return Err(ValidationError::MissingDeliveryDate);
    }
    let has_terms = po.payment_terms.as_deref().is_some_and(|terms| !terms.trim().is_empty());
    if !has_terms {
        return Err(ValidationError::MissingPaymentTerms);
    }
    Ok(())
}
