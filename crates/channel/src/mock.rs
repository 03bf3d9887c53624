use super::{ChannelError, NotificationChannel, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehaviour {
    Accept,
    Unreachable,
    Error,
    /// Fail with a transport error this many times, then accept.
    FailThenAccept(u32),
    /// Never answer; callers are expected to time out.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: String,
    pub message: OutboundMessage,
}

/// Scripted channel: per-address behaviour, everything it was asked to send
/// is recorded.
#[derive(Default)]
pub struct MockChannel {
    name: String,
    default: Option<MockBehaviour>,
    per_address: Mutex<HashMap<String, MockBehaviour>>,
    latency: Duration,
    calls: Mutex<Vec<SentMessage>>,
}

impl MockChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::with_default(name, MockBehaviour::Accept))
    }

    pub fn with_default(name: &str, default: MockBehaviour) -> Self {
        Self {
            name: name.to_string(),
            default: Some(default),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(self, address: &str, behaviour: MockBehaviour) -> Self {
        if let Ok(mut map) = self.per_address.lock() {
            map.insert(address.to_string(), behaviour);
        }
        self
    }

    /// Every send call, accepted or not.
    pub fn calls(&self) -> Vec<SentMessage> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, address: &str) -> usize {
        self.calls().iter().filter(|c| c.address == address).count()
    }

    fn behaviour_for(&self, address: &str) -> MockBehaviour {
        let mut map = match self.per_address.lock() {
            Ok(map) => map,
            Err(_) => return MockBehaviour::Error,
        };
        match map.get_mut(address) {
            Some(MockBehaviour::FailThenAccept(0)) => MockBehaviour::Accept,
            Some(MockBehaviour::FailThenAccept(n)) => {
                *n -= 1;
                MockBehaviour::Error
            }
            Some(b) => b.clone(),
            None => self.default.clone().unwrap_or(MockBehaviour::Accept),
        }
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        address: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome, ChannelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SentMessage {
                address: address.to_string(),
                message: message.clone(),
            });
        }
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        match self.behaviour_for(address) {
            MockBehaviour::Accept => {
                let id: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(16)
                    .map(char::from)
                    .collect();
                Ok(SendOutcome::Accepted { message_id: id })
            }
            MockBehaviour::Unreachable => Ok(SendOutcome::Unreachable {
                reason: format!("{address} is not registered on {}", self.name),
            }),
            MockBehaviour::Error | MockBehaviour::FailThenAccept(_) => {
                Err(ChannelError::Transport("mock transport failure".to_string()))
            }
            MockBehaviour::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage {
            reference: "RCP-1".into(),
            subject: "Receipt".into(),
            body: "hello".into(),
        }
    }

    #[tokio::test]
    async fn scripted_addresses_override_default() {
        let channel = MockChannel::with_default("chat", MockBehaviour::Accept)
            .script("27830000001", MockBehaviour::Unreachable);

        let ok = channel.send("27821234567", &message()).await.unwrap();
        assert!(ok.is_accepted());
        let unreachable = channel.send("27830000001", &message()).await.unwrap();
        assert!(matches!(unreachable, SendOutcome::Unreachable { .. }));
        assert_eq!(channel.calls().len(), 2);
    }

    #[tokio::test]
    async fn fail_then_accept_counts_down() {
        let channel = MockChannel::with_default("chat", MockBehaviour::Accept)
            .script("a", MockBehaviour::FailThenAccept(1));

        assert!(channel.send("a", &message()).await.is_err());
        assert!(channel.send("a", &message()).await.unwrap().is_accepted());
        assert_eq!(channel.calls_to("a"), 2);
    }
}
