//! Outbound channels built from `[[delivery.channels]]` entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use poflow_core::config::{ChannelConfig, DeliverySettings};
use poflow_core::delivery::{ChannelError, DeliveryChannel, DeliveryPipeline, LoggingChannel, OutboundMessage};

/// Posts the message as `multipart/form-data` with fields `to`, `subject`, `message`,
/// `poId` and an optional `pdfFile` part, the form an email relay endpoint accepts.
pub struct HttpEmailChannel {
    name: String,
    endpoint: String,
    api_key: Option<SecretString>,
    client: Client,
}

impl HttpEmailChannel {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { name: name.into(), endpoint: endpoint.into(), api_key, client: Client::new() }
    }

    fn form(message: &OutboundMessage) -> Result<Form, ChannelError> {
        let mut form = Form::new()
            .text("to", message.recipient.clone())
            .text("subject", message.subject.clone())
            .text("message", message.body.clone());
        if let Some(po_id) = &message.po_id {
            form = form.text("poId", po_id.0.clone());
        }
        if let Some(attachment) = &message.attachment {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.content_type)
                .map_err(|e| ChannelError::Configuration(format!("attachment content type: {e}")))?;
            form = form.part("pdfFile", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl DeliveryChannel for HttpEmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let mut request = self.client.post(&self.endpoint).multipart(Self::form(message)?);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|e| ChannelError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected { status: status.as_u16(), message: body });
        }

        debug!(
            event_name = "delivery.http.accepted",
            channel = %self.name,
            status = status.as_u16(),
            "email endpoint accepted message"
        );
        Ok(())
    }
}

/// Builds the channel for one config entry. `log:` selects the logging channel.
pub fn build_channel(config: &ChannelConfig) -> Arc<dyn DeliveryChannel> {
    if config.endpoint.starts_with("log:") {
        Arc::new(LoggingChannel::new(config.name.clone()))
    } else {
        Arc::new(HttpEmailChannel::new(
            config.name.clone(),
            config.endpoint.clone(),
            config.api_key.clone(),
        ))
    }
}

/// Channels in configured order, each with its own timeout.
pub fn build_pipeline(settings: &DeliverySettings) -> DeliveryPipeline {
    settings.channels.iter().fold(DeliveryPipeline::new(), |pipeline, channel| {
        let timeout = Duration::from_secs(channel.effective_timeout_secs(settings.default_timeout_secs));
        pipeline.with_channel(build_channel(channel), timeout)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, routing::post, Router};
    use secrecy::SecretString;

    use poflow_core::config::{ChannelConfig, DeliverySettings};
    use poflow_core::delivery::{Attachment, ChannelError, DeliveryChannel, OutboundMessage};
    use poflow_core::domain::purchase_order::PurchaseOrderId;

    use super::{build_pipeline, HttpEmailChannel};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>,
    }

    async fn capture(State(captured): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
        captured.requests.lock().expect("lock").push((headers, body.to_vec()));
        StatusCode::OK
    }

    async fn reject() -> (StatusCode, &'static str) {
        (StatusCode::BAD_GATEWAY, "smtp relay down")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}/send")
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            po_id: Some(PurchaseOrderId("po-7".to_string())),
            recipient: "orders@acme.test".to_string(),
            subject: "Purchase Order PO-7 Approved".to_string(),
            body: "Dear Acme".to_string(),
            attachment: Some(Attachment {
                file_name: "PO-7.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: b"%PDF-1.4".to_vec(),
            }),
        }
    }

    #[tokio::test]
    async fn posts_multipart_fields_with_bearer_token() {
        let captured = Captured::default();
        let endpoint = serve(
            Router::new().route("/send", post(capture)).with_state(captured.clone()),
        )
        .await;
        let channel = HttpEmailChannel::new(
            "relay",
            endpoint,
            Some(SecretString::from("relay-key".to_string())),
        );

        channel.send(&message()).await.expect("accepted");

        let requests = captured.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];
        assert_eq!(headers.get("authorization").and_then(|v| v.to_str().ok()), Some("Bearer relay-key"));
        let body = String::from_utf8_lossy(body);
        for field in ["name=\"to\"", "name=\"subject\"", "name=\"message\"", "name=\"poId\"", "name=\"pdfFile\""] {
            assert!(body.contains(field), "missing {field}");
        }
        assert!(body.contains("filename=\"PO-7.pdf\""));
        assert!(body.contains("orders@acme.test"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_rejection() {
        let endpoint = serve(Router::new().route("/send", post(reject))).await;
        let channel = HttpEmailChannel::new("relay", endpoint, None);

        let error = channel.send(&message()).await.expect_err("rejected");
        assert_eq!(
            error,
            ChannelError::Rejected { status: 502, message: "smtp relay down".to_string() }
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let channel = HttpEmailChannel::new("relay", "http://127.0.0.1:9/send", None);
        let error = channel.send(&message()).await.expect_err("unreachable");
        assert!(matches!(error, ChannelError::Transport(_)));
    }

    #[test]
    fn pipeline_keeps_configured_order() {
        let settings = DeliverySettings {
            default_timeout_secs: 30,
            channels: vec![
                ChannelConfig {
                    name: "primary".to_string(),
                    endpoint: "https://mail.example.test/send".to_string(),
                    timeout_secs: Some(5),
                    api_key: None,
                },
                ChannelConfig {
                    name: "log".to_string(),
                    endpoint: "log:".to_string(),
                    timeout_secs: None,
                    api_key: None,
                },
            ],
            sender_name: "Purchasing".to_string(),
            company_name: "poflow".to_string(),
        };

        assert_eq!(build_pipeline(&settings).channel_names(), vec!["primary", "log"]);
    }
}
