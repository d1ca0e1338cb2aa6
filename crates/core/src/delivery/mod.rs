//! Vendor-facing messages and the channels that carry them.

pub mod pipeline;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::artifacts::Artifact;
use crate::domain::purchase_order::{PurchaseOrder, PurchaseOrderId};

pub use pipeline::{
    AttemptOutcome, DeliveryAttempt, DeliveryFailure, DeliveryPipeline, DeliveryReport,
    DeliveryResult,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub po_id: Option<PurchaseOrderId>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("endpoint rejected message with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("channel misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;
}

/// Accepts every message and only writes it to the log. Used for local runs.
#[derive(Clone, Debug)]
pub struct LoggingChannel {
    name: String,
}

impl LoggingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DeliveryChannel for LoggingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        info!(
            event_name = "delivery.logged",
            channel = %self.name,
            recipient = %message.recipient,
            subject = %message.subject,
            attachment = message.attachment.as_ref().map(|a| a.file_name.as_str()).unwrap_or("none"),
            "message accepted by logging channel"
        );
        Ok(())
    }
}

/// Builds approval and rejection notices in the purchasing department's voice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageComposer {
    pub sender_name: String,
    pub company_name: String,
}

impl Default for MessageComposer {
    fn default() -> Self {
        Self {
            sender_name: "Purchasing Department".to_string(),
            company_name: "poflow".to_string(),
        }
    }
}

impl MessageComposer {
    pub fn approval(&self, po: &PurchaseOrder, artifact: Option<&Artifact>) -> OutboundMessage {
        let totals = po.totals();
        let tax_percent = (po.pricing.tax_rate * rust_decimal::Decimal::ONE_HUNDRED).normalize();
        let body = format!(
            "Dear {vendor},\n\n\
             We are pleased to inform you that purchase order {number} has been approved with the following details:\n\n\
             Order Number: {number}\n\
             Subtotal: ${subtotal:.2}\n\
             Tax ({tax_percent}%): ${tax:.2}\n\
             Shipping: ${shipping:.2}\n\
             Total Amount: ${total:.2}\n\n\
             Please find the approved purchase order attached to this email.\n\n\
             If you have any questions regarding this order, please contact us directly.\n\n\
             {sign_off}",
            vendor = vendor_salutation(po),
            number = po.order_number,
            subtotal = totals.subtotal,
            tax = totals.tax,
            shipping = totals.shipping,
            total = totals.total,
            sign_off = self.sign_off(),
        );

        OutboundMessage {
            po_id: Some(po.id.clone()),
            recipient: recipient(po),
            subject: format!("Purchase Order {} Approved", po.order_number),
            body,
            attachment: artifact.map(|artifact| Attachment {
                file_name: attachment_file_name(&po.order_number, &artifact.content_type),
                content_type: artifact.content_type.clone(),
                bytes: artifact.bytes.clone(),
            }),
        }
    }

    pub fn rejection(&self, po: &PurchaseOrder) -> OutboundMessage {
        let body = format!(
            "Dear {vendor},\n\n\
             We regret to inform you that purchase order {number} has been rejected.\n\n\
             Reason for Rejection: {reason}\n\n\
             If you have any questions about this decision or would like to submit a revised purchase order, please contact us directly.\n\n\
             {sign_off}",
            vendor = vendor_salutation(po),
            number = po.order_number,
            reason = po.rejection_reason.as_deref().unwrap_or("not specified"),
            sign_off = self.sign_off(),
        );

        OutboundMessage {
            po_id: Some(po.id.clone()),
            recipient: recipient(po),
            subject: format!("Purchase Order {} Rejected", po.order_number),
            body,
            attachment: None,
        }
    }

    fn sign_off(&self) -> String {
        format!("Best regards,\n{}\n{}", self.sender_name, self.company_name)
    }
}

fn vendor_salutation(po: &PurchaseOrder) -> &str {
    if po.vendor.has_name() {
        po.vendor.name.trim()
    } else {
        "Vendor"
    }
}

fn recipient(po: &PurchaseOrder) -> String {
    po.vendor.email().unwrap_or_default().to_string()
}

fn attachment_file_name(order_number: &str, content_type: &str) -> String {
    let extension = if content_type.contains("html") { "html" } else { "pdf" };
    if order_number.starts_with("PO-") {
        format!("{order_number}.{extension}")
    } else {
        format!("PO-{order_number}.{extension}")
    }
}
