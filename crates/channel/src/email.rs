//! Email delivery through an HTTP mail relay.
//!
//! The receipt text goes in the message body and is also attached as a
//! plain-text file together with its SHA-256 digest, so the recipient's mail
//! client can keep a verifiable copy.

use super::{ChannelError, NotificationChannel, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Base64 of the file content.
    pub content: String,
    /// Base64 SHA-256 digest of the file content.
    pub sha256: String,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    reference: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    id: Option<String>,
}

/// Compute SHA-256 digest in base64 format
pub fn compute_sha256_base64(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    BASE64.encode(hasher.finalize())
}

pub fn receipt_attachment(message: &OutboundMessage) -> Attachment {
    let bytes = message.body.as_bytes();
    Attachment {
        filename: format!("{}.txt", message.reference),
        content_type: "text/plain; charset=utf-8".to_string(),
        content: BASE64.encode(bytes),
        sha256: compute_sha256_base64(bytes),
    }
}

/// Very small syntactic check; the relay does the real validation.
pub fn looks_like_email(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[derive(Clone)]
pub struct EmailRelayClient {
    pub relay_url: String,
    pub from_address: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl EmailRelayClient {
    pub fn new(
        relay_url: String,
        from_address: String,
        api_key: String,
    ) -> Result<Arc<Self>, ChannelError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ChannelError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            relay_url,
            from_address,
            api_key,
            http_client,
        }))
    }
}

#[async_trait]
impl NotificationChannel for EmailRelayClient {
    fn name(&self) -> &str {
        "email_relay"
    }

    async fn send(
        &self,
        address: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome, ChannelError> {
        if !looks_like_email(address) {
            return Ok(SendOutcome::Unreachable {
                reason: format!("{address} is not an email address"),
            });
        }

        let request = RelayRequest {
            from: &self.from_address,
            to: address,
            subject: &message.subject,
            text: &message.body,
            reference: format!("ref-{}", uuid::Uuid::new_v4()),
            attachments: vec![receipt_attachment(message)],
        };
        let fallback_id = request.reference.clone();

        let response = self
            .http_client
            .post(format!("{}/send", self.relay_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Ok(SendOutcome::Unreachable {
                reason: format!("relay refused recipient: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Option<RelayResponse> = response.json().await.ok();
        let message_id = parsed.and_then(|r| r.id).unwrap_or(fallback_id);

        tracing::info!(
            message_id = %message_id,
            reference = %message.reference,
            "Receipt email accepted by relay"
        );

        Ok(SendOutcome::Accepted { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_carries_digest_of_body() {
        let message = OutboundMessage {
            reference: "RCP-42".into(),
            subject: "Your receipt".into(),
            body: "abc".into(),
        };
        let attachment = receipt_attachment(&message);
        assert_eq!(attachment.filename, "RCP-42.txt");
        assert_eq!(attachment.content, "YWJj");
        assert_eq!(
            attachment.sha256,
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("thandi@example.com"));
        assert!(!looks_like_email("27821234567"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a@localhost"));
    }
}
