use crate::error::ReceiptError;
use crate::models::{ActorRole, PartyInfo, PurchaseMode, RecipientInfo, Transaction};
use crate::money::Money;
use crate::split::ProfitSharingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest accepted gap between summed lines and the transaction total.
pub const TOTAL_EPSILON_CENTS: u64 = 1;

pub fn compute_sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let bytes = hasher.finalize();
    hex::encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardLine {
    pub label: String,
    pub amount: Money,
}

/// Who sold or administered the purchase, when it wasn't a plain customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub role: ActorRole,
    pub party_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Primary,
    Redirect,
    Email,
    RecordOnly,
}

impl DeliveryChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryChannel::Primary => "primary",
            DeliveryChannel::Redirect => "redirect",
            DeliveryChannel::Email => "email",
            DeliveryChannel::RecordOnly => "record_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent,
    Unreachable,
    Error,
    /// Nothing was sent; the receipt only lives in the store.
    Recorded,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Unreachable => "unreachable",
            AttemptOutcome::Error => "error",
            AttemptOutcome::Recorded => "recorded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub receipt_number: String,
    pub channel: DeliveryChannel,
    pub target: String,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptDeliveryStatus {
    Pending,
    Delivered,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub number: String,
    pub transaction_id: String,
    pub role: ActorRole,
    pub mode: PurchaseMode,
    pub payer: PartyInfo,
    pub recipient: Option<RecipientInfo>,
    pub lines: Vec<ReceiptLine>,
    pub total: Money,
    pub reward_lines: Vec<RewardLine>,
    pub attribution: Option<Attribution>,
    pub created_at: DateTime<Utc>,
    pub delivery_status: ReceiptDeliveryStatus,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
}

impl Receipt {
    /// Address the receipt is meant for: the recipient on third-party
    /// purchases, the payer otherwise.
    pub fn delivery_address(&self) -> &str {
        match (&self.recipient, self.mode) {
            (Some(r), PurchaseMode::ThirdParty) => &r.contact.phone,
            _ => &self.payer.phone,
        }
    }

    pub fn is_self_delivery(&self) -> bool {
        self.delivery_address() == self.payer.phone
    }

    /// Plain-text body sent over messaging channels.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Receipt {}", self.number);
        let _ = writeln!(out, "Transaction: {}", self.transaction_id);
        let _ = writeln!(out, "Date: {}", self.created_at.format("%Y-%m-%d %H:%M UTC"));
        let _ = writeln!(out, "Paid by: {} ({})", self.payer.name, self.payer.phone);
        if let Some(recipient) = &self.recipient {
            let _ = writeln!(
                out,
                "For: {} ({})",
                recipient.contact.name, recipient.contact.phone
            );
        }
        if let Some(attr) = &self.attribution {
            let _ = writeln!(out, "Processed by {} {}", attr.role, attr.name);
        }
        out.push_str("\nItems:\n");
        for line in &self.lines {
            let _ = writeln!(
                out,
                "  {} x {} @ {} = {}",
                line.quantity, line.name, line.unit_price, line.subtotal
            );
        }
        let _ = writeln!(out, "Total: {}", self.total);
        if !self.reward_lines.is_empty() {
            out.push_str("\nRewards:\n");
            for reward in &self.reward_lines {
                let _ = writeln!(out, "  {}: {}", reward.label, reward.amount);
            }
        }
        out
    }
}

/// Hands out receipt numbers: transaction timestamp, a process-wide
/// sequence and a digest of the transaction id.
#[derive(Debug, Default)]
pub struct ReceiptNumberAllocator {
    seq: AtomicU64,
}

impl ReceiptNumberAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `last`, e.g. the count of persisted receipts.
    pub fn starting_at(last: u64) -> Self {
        Self {
            seq: AtomicU64::new(last),
        }
    }

    pub fn next(&self, tx: &Transaction) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let digest = compute_sha256_hex(&format!("{}:{}", tx.id, seq));
        format!(
            "RCP-{}-{:06}-{}",
            tx.created_at.format("%Y%m%d%H%M%S%3f"),
            seq % 1_000_000,
            &digest[..8]
        )
    }
}

/// Reward lines visible to the payer: only what is credited to the payer.
fn payer_reward_lines(split: &ProfitSharingResult, has_recipient: bool) -> Vec<RewardLine> {
    let line = |label: &str, amount: Money| RewardLine {
        label: label.to_string(),
        amount,
    };
    let lines = match *split {
        ProfitSharingResult::Vendor {
            vendor_profit,
            customer_cashback,
        } => {
            let mut v = vec![line("Vendor profit", vendor_profit)];
            if !has_recipient {
                v.push(line("Cashback", customer_cashback));
            }
            v
        }
        ProfitSharingResult::Admin {
            customer_cashback,
            admin_bonus,
        } => vec![line("Cashback", customer_cashback), line("Admin bonus", admin_bonus)],
        ProfitSharingResult::CustomerSelf {
            customer_cashback, ..
        } => vec![line("Cashback", customer_cashback)],
        ProfitSharingResult::CustomerThirdParty { payer_reward, .. } => {
            vec![line("Cashback", payer_reward)]
        }
    };
    lines.into_iter().filter(|l| !l.amount.is_zero()).collect()
}

pub fn compose_receipt(
    tx: &Transaction,
    split: &ProfitSharingResult,
    payer: &PartyInfo,
    recipient: Option<&RecipientInfo>,
    allocator: &ReceiptNumberAllocator,
) -> Result<Receipt, ReceiptError> {
    if tx.items.is_empty() {
        return Err(ReceiptError::EmptyCart);
    }

    let lines = tx
        .items
        .iter()
        .map(|item| {
            let subtotal = item
                .unit_price
                .checked_mul(item.quantity)
                .ok_or_else(|| ReceiptError::LineOverflow {
                    name: item.name.clone(),
                })?;
            Ok(ReceiptLine {
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal,
            })
        })
        .collect::<Result<Vec<_>, ReceiptError>>()?;

    let total = lines.iter().try_fold(Money::ZERO, |acc, line| {
        acc.checked_add(line.subtotal)
            .ok_or_else(|| ReceiptError::LineOverflow {
                name: line.name.clone(),
            })
    })?;
    if total.abs_diff(tx.total) > TOTAL_EPSILON_CENTS {
        return Err(ReceiptError::TotalMismatch {
            lines: total,
            transaction: tx.total,
        });
    }

    let recipient = match tx.mode {
        PurchaseMode::ThirdParty => recipient.cloned(),
        PurchaseMode::SelfPurchase => None,
    };

    let attribution = match tx.role {
        ActorRole::Vendor | ActorRole::Admin => Some(Attribution {
            role: tx.role,
            party_id: payer.id.clone(),
            name: payer.name.clone(),
        }),
        ActorRole::Customer => None,
    };

    Ok(Receipt {
        number: allocator.next(tx),
        transaction_id: tx.id.clone(),
        role: tx.role,
        mode: tx.mode,
        payer: payer.clone(),
        reward_lines: payer_reward_lines(split, recipient.is_some()),
        recipient,
        lines,
        total,
        attribution,
        created_at: Utc::now(),
        delivery_status: ReceiptDeliveryStatus::Pending,
        attempts: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CartItem, PaymentStatus};
    use crate::rates::RateTable;
    use crate::split::compute_split;
    use std::collections::HashSet;

    fn transaction(role: ActorRole, mode: PurchaseMode) -> Transaction {
        Transaction {
            id: "tx-100".into(),
            payer_id: "cust-1".into(),
            role,
            mode,
            items: vec![
                CartItem {
                    name: "1GB data bundle".into(),
                    quantity: 2,
                    unit_price: Money::from_cents(4_999),
                },
                CartItem {
                    name: "R50 airtime".into(),
                    quantity: 1,
                    unit_price: Money::from_major(50),
                },
            ],
            total: Money::from_cents(14_998),
            provider_cost: Money::from_cents(12_998),
            markup: Money::from_major(20),
            status: PaymentStatus::Completed,
            created_at: Utc::now(),
        }
    }

    fn payer() -> PartyInfo {
        PartyInfo {
            id: "cust-1".into(),
            name: "Thandi".into(),
            phone: "27821234567".into(),
            email: Some("thandi@example.com".into()),
        }
    }

    fn recipient() -> RecipientInfo {
        RecipientInfo {
            contact: PartyInfo {
                id: "27830000001".into(),
                name: "Sipho".into(),
                phone: "27830000001".into(),
                email: None,
            },
            registered: false,
            relationship: Some("brother".into()),
        }
    }

    #[test]
    fn lines_sum_to_transaction_total() {
        let tx = transaction(ActorRole::Customer, PurchaseMode::SelfPurchase);
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        let receipt =
            compose_receipt(&tx, &split, &payer(), None, &ReceiptNumberAllocator::new()).unwrap();

        assert_eq!(receipt.lines.len(), 2);
        assert_eq!(receipt.lines[0].subtotal, Money::from_cents(9_998));
        let summed: Money = receipt.lines.iter().map(|l| l.subtotal).sum();
        assert_eq!(summed, tx.total);
        assert_eq!(receipt.total, tx.total);
        assert!(receipt.is_self_delivery());
        assert_eq!(receipt.delivery_status, ReceiptDeliveryStatus::Pending);
    }

    #[test]
    fn mismatched_total_is_rejected_not_corrected() {
        let mut tx = transaction(ActorRole::Customer, PurchaseMode::SelfPurchase);
        tx.total = Money::from_major(200);
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        let err = compose_receipt(&tx, &split, &payer(), None, &ReceiptNumberAllocator::new())
            .unwrap_err();
        assert_eq!(
            err,
            ReceiptError::TotalMismatch {
                lines: Money::from_cents(14_998),
                transaction: Money::from_major(200),
            }
        );
    }

    #[test]
    fn overflowing_cart_total_is_rejected() {
        let mut tx = transaction(ActorRole::Customer, PurchaseMode::SelfPurchase);
        let huge = Money::from_cents(i64::MAX / 2 + 1);
        tx.items = vec![
            CartItem {
                name: "bulk airtime".into(),
                quantity: 1,
                unit_price: huge,
            },
            CartItem {
                name: "more airtime".into(),
                quantity: 1,
                unit_price: huge,
            },
        ];
        tx.total = Money::from_cents(i64::MAX);
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        let err = compose_receipt(&tx, &split, &payer(), None, &ReceiptNumberAllocator::new())
            .unwrap_err();
        assert_eq!(
            err,
            ReceiptError::LineOverflow {
                name: "more airtime".into()
            }
        );
    }

    #[test]
    fn payer_only_sees_own_rewards() {
        let tx = transaction(ActorRole::Customer, PurchaseMode::ThirdParty);
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        let recipient = recipient();
        let receipt = compose_receipt(
            &tx,
            &split,
            &payer(),
            Some(&recipient),
            &ReceiptNumberAllocator::new(),
        )
        .unwrap();

        assert_eq!(
            receipt.reward_lines,
            vec![RewardLine {
                label: "Cashback".into(),
                amount: Money::from_major(10),
            }]
        );
        assert_eq!(receipt.delivery_address(), "27830000001");
        assert!(!receipt.is_self_delivery());
        assert!(receipt.attribution.is_none());
        assert!(!receipt.render_text().contains("R6.00"));
    }

    #[test]
    fn vendor_receipt_carries_attribution() {
        let tx = transaction(ActorRole::Vendor, PurchaseMode::ThirdParty);
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        let recipient = recipient();
        let receipt = compose_receipt(
            &tx,
            &split,
            &payer(),
            Some(&recipient),
            &ReceiptNumberAllocator::new(),
        )
        .unwrap();

        let attribution = receipt.attribution.as_ref().unwrap();
        assert_eq!(attribution.role, ActorRole::Vendor);
        assert_eq!(receipt.reward_lines.len(), 1);
        assert_eq!(receipt.reward_lines[0].label, "Vendor profit");
        assert!(receipt.render_text().contains("Processed by vendor Thandi"));
    }

    #[test]
    fn receipt_numbers_do_not_collide_within_a_millisecond() {
        let tx = transaction(ActorRole::Customer, PurchaseMode::SelfPurchase);
        let allocator = ReceiptNumberAllocator::new();
        let numbers: HashSet<String> = (0..1_000).map(|_| allocator.next(&tx)).collect();
        assert_eq!(numbers.len(), 1_000);
        assert!(numbers.iter().all(|n| n.starts_with("RCP-")));
    }

    #[test]
    fn empty_cart_cannot_be_receipted() {
        let mut tx = transaction(ActorRole::Customer, PurchaseMode::SelfPurchase);
        tx.items.clear();
        let split =
            compute_split(tx.markup, tx.mode, tx.role, &RateTable::default()).unwrap();
        assert_eq!(
            compose_receipt(&tx, &split, &payer(), None, &ReceiptNumberAllocator::new()),
            Err(ReceiptError::EmptyCart)
        );
    }
}
