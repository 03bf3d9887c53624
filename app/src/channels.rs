use anyhow::{anyhow, Result};
use channel::chat_api::{ChatApiAuth, ChatApiClient};
use channel::email::EmailRelayClient;
use channel::mock::MockChannel;
use channel::{NotificationChannel, RetryingChannel};
use config::AppConfig;
use std::sync::Arc;

/// Primary messaging channel, wrapped in the configured retry policy.
pub fn create_primary_channel(cfg: &AppConfig) -> Result<Arc<dyn NotificationChannel>> {
    let primary = &cfg.channels.primary;
    let inner: Arc<dyn NotificationChannel> = match primary.kind.as_str() {
        "chat_api" => {
            let base_url = primary
                .base_url
                .clone()
                .ok_or_else(|| anyhow!("chat_api base_url not configured"))?;

            // API key first, from env or keychain
            if let Some(key) = config::resolve_secret(config::CHAT_API_KEY) {
                tracing::info!("Using chat API with API key auth");
                ChatApiClient::new(base_url, ChatApiAuth::ApiKey { key })
            } else {
                let client_id = primary
                    .client_id
                    .clone()
                    .ok_or_else(|| anyhow!("chat_api client_id not configured"))?;
                let client_secret = config::resolve_secret(config::CHAT_CLIENT_SECRET)
                    .ok_or_else(|| anyhow!("chat_api client secret not found in env or keychain"))?;
                let token_url = primary
                    .token_url
                    .clone()
                    .unwrap_or_else(|| format!("{}/oauth/token", base_url));

                tracing::info!("Using chat API with OAuth2 auth");
                ChatApiClient::new(
                    base_url,
                    ChatApiAuth::OAuth2 {
                        client_id,
                        client_secret,
                        token_url,
                    },
                )
            }
        }
        "mock" => {
            tracing::info!("Using mock primary channel");
            MockChannel::new("mock-chat")
        }
        other => return Err(anyhow!("unknown primary channel kind {other:?}")),
    };
    Ok(RetryingChannel::new(inner, cfg.delivery.clone()))
}

/// Optional email fallback; `none` disables it.
pub fn create_email_channel(cfg: &AppConfig) -> Result<Option<Arc<dyn NotificationChannel>>> {
    let email = &cfg.channels.email;
    let inner: Arc<dyn NotificationChannel> = match email.kind.as_str() {
        "none" => return Ok(None),
        "mock" => {
            tracing::info!("Using mock email channel");
            MockChannel::new("mock-email")
        }
        "relay" => {
            let relay_url = email
                .relay_url
                .clone()
                .ok_or_else(|| anyhow!("email relay_url not configured"))?;
            let from_address = email
                .from_address
                .clone()
                .ok_or_else(|| anyhow!("email from_address not configured"))?;
            let api_key = config::resolve_secret(config::EMAIL_RELAY_KEY)
                .ok_or_else(|| anyhow!("email relay key not found in env or keychain"))?;
            tracing::info!(%relay_url, "Using email relay");
            EmailRelayClient::new(relay_url, from_address, api_key)?
        }
        other => return Err(anyhow!("unknown email channel kind {other:?}")),
    };
    Ok(Some(RetryingChannel::new(inner, cfg.delivery.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_mock_primary_without_email() {
        let cfg = AppConfig::default();
        let primary = create_primary_channel(&cfg).unwrap();
        assert_eq!(primary.name(), "mock-chat");
        assert!(create_email_channel(&cfg).unwrap().is_none());
    }

    #[test]
    fn chat_api_without_base_url_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.channels.primary.kind = "chat_api".into();
        assert!(create_primary_channel(&cfg).is_err());
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.channels.email.kind = "pigeon".into();
        assert!(create_email_channel(&cfg).is_err());
    }
}
