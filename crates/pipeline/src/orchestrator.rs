//! Settlement of one confirmed purchase: split, ledger, receipt, delivery.
//!
//! Only an unconfirmed payment or invalid configuration stops a settlement,
//! and both are detected before anything is written. Every later failure is
//! turned into a warning on the report; the payment itself stands.

use crate::audit::{AuditEvent, AuditLog};
use crate::delivery::{DeliveryReport, DeliveryRouter};
use crate::directory::RecipientDirectory;
use crate::ledger::{LedgerOutcome, Parties, RecipientParty, RewardLedger};
use crate::records::ReceiptRecords;
use mvne_core::phone::normalize_phone;
use mvne_core::{
    compose_receipt, compute_split, ConfigurationError, DeliveryChannel, PartyInfo,
    PaymentStatus, ProfitSharingResult, PurchaseMode, RateTable, Receipt,
    ReceiptDeliveryStatus, ReceiptNumberAllocator, RecipientInfo, Transaction,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use store::{key_segment, KvStore};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// A confirmed payment plus the contact details needed to settle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub transaction: Transaction,
    pub payer: PartyInfo,
    #[serde(default)]
    pub recipient: Option<RecipientInfo>,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("transaction {transaction_id} is {status:?}, not completed")]
    PaymentNotCompleted {
        transaction_id: String,
        status: PaymentStatus,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid {who} phone number {value:?}")]
    InvalidAddress { who: &'static str, value: String },
    #[error("invalid {who} id {value:?}")]
    InvalidIdentifier { who: &'static str, value: String },
}

/// Ids become storage key segments; anything that could alias another key
/// is refused up front.
fn check_id(who: &'static str, value: &str) -> Result<(), SettlementError> {
    key_segment(value).map(|_| ()).map_err(|_| SettlementError::InvalidIdentifier {
        who,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementWarning {
    LedgerPartial { failed_parties: Vec<String> },
    DirectoryNotUpdated { error: String },
    ReceiptNotComposed { error: String },
    DeliveryExhausted { receipt_number: String },
    /// Some receipt or attempt writes failed; the transaction stays the
    /// source of truth.
    NotFullyRecorded { errors: Vec<String> },
}

impl SettlementWarning {
    fn user_text(&self) -> &'static str {
        match self {
            SettlementWarning::LedgerPartial { .. } => "some rewards could not be credited yet",
            SettlementWarning::DirectoryNotUpdated { .. } => "the recipient was not saved to your contacts",
            SettlementWarning::ReceiptNotComposed { .. } => "the receipt could not be generated",
            SettlementWarning::DeliveryExhausted { .. } => {
                "the receipt could not be sent and is available in your history"
            }
            SettlementWarning::NotFullyRecorded { .. } => {
                "the purchase was processed but not fully recorded"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub transaction_id: String,
    pub split: ProfitSharingResult,
    pub ledger: LedgerOutcome,
    pub receipt: Option<Receipt>,
    pub delivery: Option<DeliveryReport>,
    pub warnings: Vec<SettlementWarning>,
}

impl SettlementReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// What the payer is told. Payment success always leads; problems
    /// after it are listed with a retry hint.
    pub fn user_message(&self) -> String {
        let mut msg = format!("Payment successful (transaction {}).", self.transaction_id);
        if self.warnings.is_empty() {
            return msg;
        }
        let issues: Vec<&str> = self.warnings.iter().map(SettlementWarning::user_text).collect();
        msg.push_str(" However, ");
        msg.push_str(&issues.join("; "));
        msg.push_str(". You can retry from your transaction history.");
        msg
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub rates: RateTable,
    pub platform_account: String,
    pub country_code: String,
    pub directory_capacity: usize,
    pub audit_path: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rates: RateTable::default(),
            platform_account: "platform".to_string(),
            country_code: mvne_core::phone::DEFAULT_COUNTRY_CODE.to_string(),
            directory_capacity: crate::directory::DEFAULT_CAPACITY,
            audit_path: None,
        }
    }
}

pub struct SettlementPipeline {
    settings: PipelineSettings,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    ledger: RewardLedger,
    directory: RecipientDirectory,
    records: ReceiptRecords,
    allocator: ReceiptNumberAllocator,
    router: DeliveryRouter,
    audit: AuditLog,
}

impl SettlementPipeline {
    pub fn new(
        store: Arc<dyn KvStore>,
        router: DeliveryRouter,
        settings: PipelineSettings,
    ) -> Result<Self, SettlementError> {
        settings.rates.validate()?;
        check_id("platform account", &settings.platform_account)?;
        let records = ReceiptRecords::new(Arc::clone(&store));
        let issued = records.count().unwrap_or(0) as u64;
        Ok(Self {
            ledger: RewardLedger::new(Arc::clone(&store)),
            directory: RecipientDirectory::new(
                Arc::clone(&store),
                settings.directory_capacity,
                &settings.country_code,
            ),
            records,
            allocator: ReceiptNumberAllocator::starting_at(issued),
            router,
            audit: AuditLog::new(settings.audit_path.clone()),
            in_flight: Mutex::new(HashMap::new()),
            settings,
        })
    }

    pub fn ledger(&self) -> &RewardLedger {
        &self.ledger
    }

    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    pub fn records(&self) -> &ReceiptRecords {
        &self.records
    }

    /// Settle on a fresh task. The task always runs to completion.
    pub fn spawn(self: &Arc<Self>, request: SettlementRequest) -> JoinHandle<Result<SettlementReport, SettlementError>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let transaction_id = request.transaction.id.clone();
            let result = pipeline.settle(request).await;
            if let Err(e) = &result {
                tracing::error!(transaction_id=%transaction_id, error=%e, "settlement rejected");
            }
            result
        })
    }

    fn transaction_lock(&self, transaction_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(transaction_id.to_string()).or_default())
    }

    fn release_transaction_lock(&self, transaction_id: &str) {
        let mut locks = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(transaction_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(transaction_id);
        }
    }

    fn normalize(&self, who: &'static str, phone: &str) -> Result<String, SettlementError> {
        normalize_phone(phone, &self.settings.country_code).ok_or_else(|| SettlementError::InvalidAddress {
            who,
            value: phone.to_string(),
        })
    }

    /// Checks that must pass before any side effect.
    fn prepare(
        &self,
        request: SettlementRequest,
    ) -> Result<(Transaction, PartyInfo, Option<RecipientInfo>, ProfitSharingResult), SettlementError> {
        let SettlementRequest {
            transaction: tx,
            mut payer,
            recipient,
        } = request;

        if !tx.is_completed() {
            return Err(SettlementError::PaymentNotCompleted {
                transaction_id: tx.id.clone(),
                status: tx.status,
            });
        }

        check_id("transaction", &tx.id)?;
        check_id("payer", &payer.id)?;
        payer.phone = self.normalize("payer", &payer.phone)?;
        let recipient = match tx.mode {
            PurchaseMode::ThirdParty => {
                let mut r = recipient.ok_or(ConfigurationError::MissingRecipient)?;
                check_id("recipient", &r.contact.id)?;
                r.contact.phone = self.normalize("recipient", &r.contact.phone)?;
                Some(r)
            }
            PurchaseMode::SelfPurchase => None,
        };

        let split = compute_split(tx.markup, tx.mode, tx.role, &self.settings.rates)?;
        Ok((tx, payer, recipient, split))
    }

    /// Settles one request. Requests for the same transaction run one at a
    /// time; a duplicate waits and then finds the earlier outcome.
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementReport, SettlementError> {
        let (tx, payer, recipient, split) = self.prepare(request)?;
        let transaction_id = tx.id.clone();
        let lock = self.transaction_lock(&transaction_id);
        let report = {
            let _serial = lock.lock().await;
            self.run(tx, payer, recipient, split).await
        };
        drop(lock);
        self.release_transaction_lock(&transaction_id);
        Ok(report)
    }

    async fn run(
        &self,
        tx: Transaction,
        payer: PartyInfo,
        recipient: Option<RecipientInfo>,
        split: ProfitSharingResult,
    ) -> SettlementReport {
        let mut warnings = Vec::new();
        let mut unrecorded = Vec::new();

        tracing::info!(
            transaction_id = %tx.id,
            role = %tx.role,
            mode = %tx.mode,
            markup = %tx.markup,
            split = split.kind(),
            "settling confirmed payment"
        );
        self.audit
            .record(AuditEvent::new("split_computed", &tx.id, split.kind()).with_amount(tx.markup));

        // Ledger
        let parties = Parties {
            payer_id: payer.id.clone(),
            payer_role: tx.role,
            recipient: recipient.as_ref().map(|r| RecipientParty {
                id: r.contact.id.clone(),
                registered: r.registered,
            }),
            platform_account: self.settings.platform_account.clone(),
        };
        let ledger = self.ledger.apply_rewards(&tx.id, &split, &parties);
        if ledger.success() {
            self.audit.record(AuditEvent::new("ledger_applied", &tx.id, "applied"));
        } else {
            let failed_parties = ledger.failed_parties();
            for party in &failed_parties {
                self.audit
                    .record(AuditEvent::new("ledger_failed", &tx.id, "failed").with_party(party));
            }
            tracing::warn!(transaction_id = %tx.id, failed = ?failed_parties, "rewards partially applied");
            warnings.push(SettlementWarning::LedgerPartial { failed_parties });
        }

        // Receipt; a replayed transaction reuses its stored receipt.
        let existing = match self.records.by_transaction(&tx.id) {
            Ok(found) => found,
            Err(e) => {
                unrecorded.push(format!("receipt lookup: {e}"));
                None
            }
        };
        // A replay is not a new use of the recipient.
        if existing.is_none() {
            if let Some(r) = &recipient {
                if let Err(e) =
                    self.directory
                        .record_use(&r.contact.phone, &r.contact.name, r.relationship.as_deref())
                {
                    tracing::warn!(transaction_id = %tx.id, error = %e, "recipient directory not updated");
                    warnings.push(SettlementWarning::DirectoryNotUpdated { error: e.to_string() });
                }
            }
        }

        let mut receipt = match existing {
            Some(receipt) => receipt,
            None => match compose_receipt(&tx, &split, &payer, recipient.as_ref(), &self.allocator) {
                Ok(receipt) => {
                    self.audit.record(
                        AuditEvent::new("receipt_composed", &tx.id, "pending")
                            .with_receipt(&receipt.number)
                            .with_amount(receipt.total),
                    );
                    if let Err(e) = self.records.save(&receipt) {
                        tracing::error!(transaction_id = %tx.id, error = %e, "receipt not persisted");
                        self.audit.record(
                            AuditEvent::new("receipt_not_recorded", &tx.id, "unrecorded").with_error(&e),
                        );
                        unrecorded.push(format!("receipt: {e}"));
                    }
                    receipt
                }
                Err(e) => {
                    tracing::error!(transaction_id = %tx.id, error = %e, "receipt not composed");
                    warnings.push(SettlementWarning::ReceiptNotComposed { error: e.to_string() });
                    return self.finish(tx.id, split, ledger, None, None, warnings, unrecorded);
                }
            },
        };

        if receipt.delivery_status == ReceiptDeliveryStatus::Delivered {
            tracing::info!(transaction_id = %tx.id, receipt = %receipt.number, "receipt already delivered");
            return self.finish(tx.id, split, ledger, Some(receipt), None, warnings, unrecorded);
        }

        // Delivery
        let report = self.router.deliver(&receipt).await;
        for attempt in &report.attempts {
            self.audit.record(
                AuditEvent::new("delivery_attempt", &tx.id, attempt.outcome.as_str())
                    .with_receipt(&receipt.number)
                    .with_party(&attempt.target),
            );
        }

        let status = if report.is_delivered() {
            ReceiptDeliveryStatus::Delivered
        } else {
            warnings.push(SettlementWarning::DeliveryExhausted {
                receipt_number: receipt.number.clone(),
            });
            ReceiptDeliveryStatus::Exhausted
        };
        if let Err(e) = self.records.finish_delivery(&mut receipt, status, &report.attempts) {
            tracing::error!(transaction_id = %tx.id, error = %e, "delivery attempts not persisted");
            unrecorded.push(format!("delivery attempts: {e}"));
        }
        self.audit.record(
            AuditEvent::new("delivery_finished", &tx.id, &format!("{:?}", report.terminal()))
                .with_receipt(&receipt.number),
        );

        if report.delivered_via == Some(DeliveryChannel::Primary) {
            if let Some(r) = &recipient {
                if let Err(e) = self.directory.mark_verified(&r.contact.phone) {
                    tracing::warn!(transaction_id = %tx.id, error = %e, "recipient not marked verified");
                }
            }
        }

        self.finish(tx.id, split, ledger, Some(receipt), Some(report), warnings, unrecorded)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        transaction_id: String,
        split: ProfitSharingResult,
        ledger: LedgerOutcome,
        receipt: Option<Receipt>,
        delivery: Option<DeliveryReport>,
        mut warnings: Vec<SettlementWarning>,
        unrecorded: Vec<String>,
    ) -> SettlementReport {
        if !unrecorded.is_empty() {
            warnings.push(SettlementWarning::NotFullyRecorded { errors: unrecorded });
        }
        let state = if warnings.is_empty() { "completed" } else { "completed_with_warnings" };
        self.audit.record(AuditEvent::new("settlement_finished", &transaction_id, state));
        tracing::info!(transaction_id = %transaction_id, warnings = warnings.len(), "settlement finished");

        SettlementReport {
            transaction_id,
            split,
            ledger,
            receipt,
            delivery,
            warnings,
        }
    }
}
