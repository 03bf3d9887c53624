use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Message handed to a channel. `reference` ties it back to a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub reference: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    Accepted { message_id: String },
    /// The destination is unknown to the channel or cannot receive messages.
    Unreachable { reason: String },
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("channel rejected the request: {status} - {body}")]
    Rejected { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChannelError::Timeout(Duration::ZERO)
        } else {
            ChannelError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short label for logs and audit records.
    fn name(&self) -> &str;

    async fn send(&self, address: &str, message: &OutboundMessage)
        -> Result<SendOutcome, ChannelError>;
}

pub mod chat_api;
pub mod email;
pub mod mock;
pub mod retry;

pub use retry::{RetryPolicy, RetryingChannel};
