use super::{ChannelError, NotificationChannel, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Error codes the messaging API uses for numbers that cannot receive chat
/// messages (not on the service, blocked, or opted out).
const UNREACHABLE_CODES: &[&str] = &["recipient_not_registered", "recipient_unreachable", "131026"];

/// HTTP client for a chat-messaging API (WhatsApp Business style): one
/// text message per receipt, addressed by international phone number.
#[derive(Clone)]
pub struct ChatApiClient {
    pub base_url: String,
    pub auth: ChatApiAuth,
    http_client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

#[derive(Clone)]
pub enum ChatApiAuth {
    ApiKey {
        key: String,
    },
    OAuth2 {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct SentMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<SentMessageRef>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: serde_json::Value,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct OAuth2TokenRequest {
    grant_type: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct OAuth2TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

impl ChatApiClient {
    pub fn new(base_url: String, auth: ChatApiAuth) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            auth,
            http_client: reqwest::Client::new(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    async fn get_auth_header(&self) -> Result<String, ChannelError> {
        match &self.auth {
            ChatApiAuth::ApiKey { key } => Ok(format!("Bearer {}", key)),
            ChatApiAuth::OAuth2 {
                client_id,
                client_secret,
                token_url,
            } => {
                {
                    let token_read = self.access_token.read().await;
                    if let Some(t) = token_read.as_ref() {
                        return Ok(format!("Bearer {}", t));
                    }
                }

                let req_body = OAuth2TokenRequest {
                    grant_type: "client_credentials".to_string(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                };

                let resp = self.http_client.post(token_url).json(&req_body).send().await?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(ChannelError::Auth(format!("{} - {}", status, body)));
                }

                let token_resp: OAuth2TokenResponse = resp
                    .json()
                    .await
                    .map_err(|e| ChannelError::Auth(format!("bad token response: {e}")))?;

                {
                    let mut token_write = self.access_token.write().await;
                    *token_write = Some(token_resp.access_token.clone());
                }

                Ok(format!("Bearer {}", token_resp.access_token))
            }
        }
    }

    async fn forget_token(&self) {
        *self.access_token.write().await = None;
    }
}

/// Maps a non-success reply to either a definitive "unreachable" answer or
/// an error.
fn classify_failure(status: StatusCode, body: &str) -> Result<SendOutcome, ChannelError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(SendOutcome::Unreachable {
            reason: "number not found on chat service".to_string(),
        });
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        let code = match &parsed.error.code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if UNREACHABLE_CODES.contains(&code.as_str()) {
            return Ok(SendOutcome::Unreachable {
                reason: parsed.error.message.unwrap_or(code),
            });
        }
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ChannelError::Auth(format!("{} - {}", status, body)));
    }
    Err(ChannelError::Rejected {
        status: status.as_u16(),
        body: body.to_string(),
    })
}

#[async_trait]
impl NotificationChannel for ChatApiClient {
    fn name(&self) -> &str {
        "chat_api"
    }

    async fn send(
        &self,
        address: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome, ChannelError> {
        let auth_header = self.get_auth_header().await?;
        let send_url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let payload = SendRequest {
            to: address,
            kind: "text",
            text: TextBody {
                body: &message.body,
            },
            reference: &message.reference,
        };

        let resp = self
            .http_client
            .post(&send_url)
            .header("Authorization", auth_header)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                self.forget_token().await;
            }
            return classify_failure(status, &body);
        }

        let sent: SendResponse = resp.json().await.map_err(|e| ChannelError::Rejected {
            status: 200,
            body: format!("unparseable send response: {e}"),
        })?;
        let message_id = sent
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| ChannelError::Rejected {
                status: 200,
                body: "send response carried no message id".to_string(),
            })?;

        tracing::info!(
            message_id = %message_id,
            reference = %message.reference,
            "Receipt message accepted by chat API"
        );

        Ok(SendOutcome::Accepted { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_means_unreachable() {
        let outcome = classify_failure(StatusCode::NOT_FOUND, "").unwrap();
        assert!(matches!(outcome, SendOutcome::Unreachable { .. }));
    }

    #[test]
    fn unregistered_error_code_means_unreachable() {
        let body = r#"{"error":{"code":131026,"message":"Message undeliverable"}}"#;
        let outcome = classify_failure(StatusCode::BAD_REQUEST, body).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Unreachable {
                reason: "Message undeliverable".to_string()
            }
        );

        let body = r#"{"error":{"code":"recipient_not_registered"}}"#;
        let outcome = classify_failure(StatusCode::UNPROCESSABLE_ENTITY, body).unwrap();
        assert!(matches!(outcome, SendOutcome::Unreachable { .. }));
    }

    #[test]
    fn other_failures_are_errors() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, "upstream down").unwrap_err();
        assert_eq!(
            err,
            ChannelError::Rejected {
                status: 502,
                body: "upstream down".to_string()
            }
        );
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, "expired"),
            Err(ChannelError::Auth(_))
        ));
    }
}
