//! Purchase-order documents rendered from a Tera template and converted to PDF with
//! `wkhtmltopdf` when it is installed. Without the converter the HTML itself is the artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, warn};

use poflow_core::artifacts::{DocumentRenderer, RenderError, RenderedDocument};
use poflow_core::domain::purchase_order::PurchaseOrder;

pub const TEMPLATE_NAME: &str = "purchase_order.html.tera";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const EMBEDDED_TEMPLATE: &str = include_str!("../templates/purchase_order.html.tera");

/// Register custom Tera filters used by the order template.
///
/// - `money`: two-decimal rendering of a number or decimal string, e.g. `amount | money`
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(text) => Decimal::from_str(text)
            .map_err(|e| tera::Error::msg(format!("money filter expects a decimal: {e}")))?,
        tera::Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    };
    Ok(tera::Value::String(format!("{:.2}", amount.round_dp(2))))
}

#[derive(Clone, Debug)]
pub struct DocumentBranding {
    pub company_name: String,
    pub sender_name: String,
}

impl Default for DocumentBranding {
    fn default() -> Self {
        Self { company_name: "poflow".to_string(), sender_name: "Purchasing Department".to_string() }
    }
}

#[derive(Clone, Debug)]
pub struct PdfRenderer {
    tera: Tera,
    branding: DocumentBranding,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl PdfRenderer {
    /// Loads `purchase_order.html.tera` from `template_dir`.
    pub fn from_dir(template_dir: &Path, branding: DocumentBranding) -> Result<Self, RenderError> {
        let glob = format!("{}/**/*.tera", template_dir.display());
        let mut tera = Tera::new(&glob).map_err(|e| RenderError::Template(e.to_string()))?;
        if !tera.get_template_names().any(|name| name == TEMPLATE_NAME) {
            return Err(RenderError::Template(format!(
                "{TEMPLATE_NAME} not found under {}",
                template_dir.display()
            )));
        }
        Ok(Self::finish(tera, branding))
    }

    pub fn embedded(branding: DocumentBranding) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, EMBEDDED_TEMPLATE)
            .map_err(|e| RenderError::Template(e.to_string()))?;
        Ok(Self::finish(tera, branding))
    }

    fn finish(mut tera: Tera, branding: DocumentBranding) -> Self {
        tera.autoescape_on(vec![".html.tera"]);
        register_template_filters(&mut tera);

        let wkhtmltopdf_path = which::which("wkhtmltopdf").ok();
        match &wkhtmltopdf_path {
            Some(path) => info!(
                event_name = "render.converter_found",
                path = %path.display(),
                "wkhtmltopdf found"
            ),
            None => warn!(
                event_name = "render.converter_missing",
                "wkhtmltopdf not found in PATH; documents will be delivered as HTML"
            ),
        }

        Self { tera, branding, wkhtmltopdf_path }
    }

    /// Disables PDF conversion so every render returns HTML.
    pub fn html_only(mut self) -> Self {
        self.wkhtmltopdf_path = None;
        self
    }

    pub fn converts_to_pdf(&self) -> bool {
        self.wkhtmltopdf_path.is_some()
    }

    pub fn render_html(&self, po: &PurchaseOrder) -> Result<String, RenderError> {
        let mut context = Context::new();
        context.insert("doc", &DocumentView::from(po));
        context.insert("vendor", &VendorView::from(po));
        context.insert("lines", &line_views(po));
        context.insert("totals", &po.totals());
        context.insert("tax_percent", &(po.pricing.tax_rate * Decimal::from(100)).normalize().to_string());
        context.insert("company_name", &self.branding.company_name);
        context.insert("sender_name", &self.branding.sender_name);

        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| RenderError::Template(template_error_chain(&e)))
    }

    async fn convert_html_to_pdf(
        &self,
        html: &str,
        wkhtmltopdf_path: &Path,
    ) -> Result<Vec<u8>, RenderError> {
        let temp_dir = std::env::temp_dir();
        let stem = format!("po_{}", uuid::Uuid::new_v4());
        let html_path = temp_dir.join(format!("{stem}.html"));
        let pdf_path = temp_dir.join(format!("{stem}.pdf"));

        tokio::fs::write(&html_path, html).await.map_err(|e| RenderError::Io(e.to_string()))?;

        let output = Command::new(wkhtmltopdf_path)
            .args(["--page-size", "A4", "--encoding", "utf-8", "--quiet"])
            .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
            .args(["--margin-left", "10mm", "--margin-right", "10mm"])
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let result = match output {
            Ok(output) if output.status.success() => tokio::fs::read(&pdf_path)
                .await
                .map_err(|e| RenderError::Io(e.to_string())),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                error!(event_name = "render.converter_failed", stderr = %stderr, "wkhtmltopdf failed");
                Err(RenderError::Conversion(stderr))
            }
            Err(e) => Err(RenderError::Io(e.to_string())),
        };

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&pdf_path).await;
        result
    }
}

#[async_trait]
impl DocumentRenderer for PdfRenderer {
    async fn render(&self, po: &PurchaseOrder) -> Result<RenderedDocument, RenderError> {
        let html = self.render_html(po)?;

        if let Some(path) = &self.wkhtmltopdf_path {
            match self.convert_html_to_pdf(&html, path).await {
                Ok(bytes) => {
                    info!(event_name = "render.pdf_generated", po_id = %po.id, size = bytes.len(), "PDF generated");
                    return Ok(RenderedDocument { content_type: PDF_CONTENT_TYPE.to_string(), bytes });
                }
                Err(e) => {
                    warn!(event_name = "render.pdf_fallback", po_id = %po.id, error = %e, "PDF conversion failed, falling back to HTML");
                }
            }
        }

        Ok(RenderedDocument { content_type: HTML_CONTENT_TYPE.to_string(), bytes: html.into_bytes() })
    }
}

#[derive(Serialize)]
struct DocumentView {
    order_number: String,
    status: String,
    site: String,
    created_on: String,
    delivery_date: String,
    payment_terms: String,
    notes: String,
    rejection_reason: String,
}

impl From<&PurchaseOrder> for DocumentView {
    fn from(po: &PurchaseOrder) -> Self {
        Self {
            order_number: po.order_number.clone(),
            status: po.status.as_str().to_ascii_uppercase(),
            site: po.site.clone(),
            created_on: po.created_at.format("%Y-%m-%d").to_string(),
            delivery_date: po.delivery_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            payment_terms: po.payment_terms.clone().unwrap_or_default(),
            notes: po.notes.clone().unwrap_or_default(),
            rejection_reason: po.rejection_reason.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct VendorView {
    name: String,
    contact_person: String,
    address: String,
    email: String,
    phone: String,
}

impl From<&PurchaseOrder> for VendorView {
    fn from(po: &PurchaseOrder) -> Self {
        let vendor = &po.vendor;
        Self {
            name: vendor.name.clone(),
            contact_person: vendor.contact_person.clone().unwrap_or_default(),
            address: vendor.address.clone().unwrap_or_default(),
            email: vendor.email.clone().unwrap_or_default(),
            phone: vendor.phone.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct LineView {
    name: String,
    quantity: u32,
    unit_price: Decimal,
    total: Decimal,
}

fn line_views(po: &PurchaseOrder) -> Vec<LineView> {
    po.items
        .iter()
        .map(|item| LineView {
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total: item.line_total(),
        })
        .collect()
}

fn template_error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use poflow_core::artifacts::{DocumentRenderer, RenderError};
    use poflow_core::domain::purchase_order::{
        LineItem, NewPurchaseOrder, PricingTerms, PurchaseOrder,
    };
    use poflow_core::domain::vendor::Vendor;

    use super::{DocumentBranding, PdfRenderer, HTML_CONTENT_TYPE};

    fn order() -> PurchaseOrder {
        PurchaseOrder::new_draft(
            NewPurchaseOrder {
                order_number: Some("PO-2026-0042".to_string()),
                site: "Modesto".to_string(),
                vendor: Vendor {
                    address: Some("123 Vendor Street".to_string()),
                    ..Vendor::named("Acme <Industrial>")
                },
                items: vec![
                    LineItem::new("Safety gloves", 2, Decimal::new(1000, 2)),
                    LineItem::new("Hard hat", 1, Decimal::new(1250, 2)),
                ],
                pricing: Some(PricingTerms {
                    tax_rate: Decimal::new(10, 2),
                    shipping: Decimal::new(500, 2),
                }),
                delivery_date: NaiveDate::from_ymd_opt(2026, 11, 30),
                payment_terms: Some("Net 30".to_string()),
                notes: None,
            },
            &PricingTerms::default(),
            "buyer",
        )
        .expect("valid draft")
    }

    #[test]
    fn html_lists_lines_totals_and_escapes_vendor() {
        let renderer = PdfRenderer::embedded(DocumentBranding::default()).expect("template");
        let html = renderer.render_html(&order()).expect("render");

        assert!(html.contains("PO-2026-0042"));
        assert!(html.contains("Acme &lt;Industrial&gt;"));
        assert!(html.contains("Safety gloves"));
        assert!(html.contains("$20.00"));
        assert!(html.contains("Tax (10%)"));
        assert!(html.contains("$3.25"));
        assert!(html.contains("$40.75"));
        assert!(html.contains("2026-11-30"));
        assert!(html.contains("Net 30"));
        assert!(!html.contains("REJECTION REASON"));
    }

    #[tokio::test]
    async fn falls_back_to_html_without_converter() {
        let renderer =
            PdfRenderer::embedded(DocumentBranding::default()).expect("template").html_only();
        assert!(!renderer.converts_to_pdf());

        let document = renderer.render(&order()).await.expect("render");
        assert_eq!(document.content_type, HTML_CONTENT_TYPE);
        assert!(String::from_utf8_lossy(&document.bytes).contains("PURCHASE<br>ORDER"));
    }

    #[test]
    fn template_dir_without_order_template_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("other.html.tera"), "hello").expect("write");

        let error = PdfRenderer::from_dir(dir.path(), DocumentBranding::default()).expect_err("missing");
        assert!(matches!(error, RenderError::Template(_)));
    }

    #[test]
    fn custom_template_dir_is_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("purchase_order.html.tera"),
            "{{ doc.order_number }} owes ${{ totals.total | money }}",
        )
        .expect("write");

        let renderer = PdfRenderer::from_dir(dir.path(), DocumentBranding::default()).expect("load");
        let html = renderer.render_html(&order()).expect("render");
        assert_eq!(html, "PO-2026-0042 owes $40.75");
    }
}
