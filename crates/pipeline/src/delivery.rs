//! Receipt delivery with fallback.
//!
//! ```text
//! Created ─► PrimarySent ─► Delivered
//!    │
//!    └─► PrimaryUnreachable ─► RedirectSent ─► Delivered     (recipient ≠ payer)
//!                 │
//!                 └─► EmailSent ─► Delivered                  (payer email known)
//!                 │
//!                 └─► Exhausted                               (record only)
//! ```
//!
//! Transport errors are retried by the channel wrapper; whatever still fails
//! is handled like an unreachable destination.

use channel::{NotificationChannel, OutboundMessage, SendOutcome};
use chrono::Utc;
use mvne_core::{AttemptOutcome, DeliveryAttempt, DeliveryChannel, Receipt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Created,
    PrimarySent,
    PrimaryUnreachable,
    RedirectSent,
    EmailSent,
    Delivered,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub receipt_number: String,
    /// Every state visited, in order; the last one is terminal.
    pub path: Vec<DeliveryState>,
    pub attempts: Vec<DeliveryAttempt>,
    pub delivered_via: Option<DeliveryChannel>,
}

impl DeliveryReport {
    pub fn terminal(&self) -> DeliveryState {
        self.path.last().copied().unwrap_or(DeliveryState::Created)
    }

    pub fn reached(&self, state: DeliveryState) -> bool {
        self.path.contains(&state)
    }

    pub fn is_delivered(&self) -> bool {
        self.terminal() == DeliveryState::Delivered
    }
}

pub fn receipt_message(receipt: &Receipt) -> OutboundMessage {
    OutboundMessage {
        reference: receipt.number.clone(),
        subject: format!("Receipt {}", receipt.number),
        body: receipt.render_text(),
    }
}

/// Message for the payer when the recipient could not be reached: the
/// original receipt verbatim plus how to pass it on by hand.
pub fn redirect_message(receipt: &Receipt) -> OutboundMessage {
    let (name, phone) = match &receipt.recipient {
        Some(r) => (r.contact.name.as_str(), r.contact.phone.as_str()),
        None => ("the recipient", receipt.delivery_address()),
    };
    let body = format!(
        "We could not deliver this receipt to {name} ({phone}).\n\
         Please pass it on yourself: forward it by SMS, read it out on a call, \
         send it by email or show it in person.\n\n\
         --- Original receipt ---\n{}",
        receipt.render_text()
    );
    OutboundMessage {
        reference: receipt.number.clone(),
        subject: format!("Action needed: forward receipt {}", receipt.number),
        body,
    }
}

pub struct DeliveryRouter {
    primary: Arc<dyn NotificationChannel>,
    email: Option<Arc<dyn NotificationChannel>>,
}

impl DeliveryRouter {
    pub fn new(primary: Arc<dyn NotificationChannel>, email: Option<Arc<dyn NotificationChannel>>) -> Self {
        Self { primary, email }
    }

    /// Runs the state machine to a terminal state. Never fails: the outcome
    /// is in the report.
    pub async fn deliver(&self, receipt: &Receipt) -> DeliveryReport {
        let mut report = DeliveryReport {
            receipt_number: receipt.number.clone(),
            path: vec![DeliveryState::Created],
            attempts: Vec::new(),
            delivered_via: None,
        };
        let target = receipt.delivery_address().to_string();
        let self_delivery = receipt.is_self_delivery();

        let primary = receipt_message(receipt);
        if self
            .attempt(&mut report, self.primary.as_ref(), DeliveryChannel::Primary, &target, &primary)
            .await
        {
            report.path.push(DeliveryState::PrimarySent);
            return Self::finish_delivered(report, DeliveryChannel::Primary);
        }
        report.path.push(DeliveryState::PrimaryUnreachable);

        let fallback = if self_delivery {
            primary
        } else {
            let redirect = redirect_message(receipt);
            if self
                .attempt(
                    &mut report,
                    self.primary.as_ref(),
                    DeliveryChannel::Redirect,
                    &receipt.payer.phone,
                    &redirect,
                )
                .await
            {
                report.path.push(DeliveryState::RedirectSent);
                return Self::finish_delivered(report, DeliveryChannel::Redirect);
            }
            redirect
        };

        if let (Some(email), Some(address)) = (&self.email, receipt.payer.email.as_deref()) {
            if self
                .attempt(&mut report, email.as_ref(), DeliveryChannel::Email, address, &fallback)
                .await
            {
                report.path.push(DeliveryState::EmailSent);
                return Self::finish_delivered(report, DeliveryChannel::Email);
            }
        }

        report.attempts.push(DeliveryAttempt {
            receipt_number: receipt.number.clone(),
            channel: DeliveryChannel::RecordOnly,
            target: "store".to_string(),
            outcome: AttemptOutcome::Recorded,
            detail: Some("every channel failed; receipt kept on record".to_string()),
            timestamp: Utc::now(),
        });
        report.path.push(DeliveryState::Exhausted);
        tracing::warn!(receipt = %receipt.number, "receipt delivery exhausted");
        report
    }

    fn finish_delivered(mut report: DeliveryReport, via: DeliveryChannel) -> DeliveryReport {
        report.path.push(DeliveryState::Delivered);
        report.delivered_via = Some(via);
        tracing::info!(receipt = %report.receipt_number, via = via.as_str(), "receipt delivered");
        report
    }

    /// One send; records the attempt and returns whether it was accepted.
    async fn attempt(
        &self,
        report: &mut DeliveryReport,
        channel: &dyn NotificationChannel,
        kind: DeliveryChannel,
        target: &str,
        message: &OutboundMessage,
    ) -> bool {
        let (outcome, detail) = match channel.send(target, message).await {
            Ok(SendOutcome::Accepted { message_id }) => (AttemptOutcome::Sent, Some(message_id)),
            Ok(SendOutcome::Unreachable { reason }) => (AttemptOutcome::Unreachable, Some(reason)),
            Err(err) => (AttemptOutcome::Error, Some(err.to_string())),
        };

        tracing::info!(
            receipt = %report.receipt_number,
            channel = channel.name(),
            step = kind.as_str(),
            target = %target,
            outcome = outcome.as_str(),
            "delivery attempt"
        );

        report.attempts.push(DeliveryAttempt {
            receipt_number: report.receipt_number.clone(),
            channel: kind,
            target: target.to_string(),
            outcome,
            detail,
            timestamp: Utc::now(),
        });
        outcome == AttemptOutcome::Sent
    }
}
