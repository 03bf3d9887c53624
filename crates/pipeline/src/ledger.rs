//! Reward ledger: one entry per (party, transaction).
//!
//! Balances are the sum of a party's applied entries, so replaying a
//! transaction can never credit twice.

use chrono::{DateTime, Utc};
use mvne_core::{ActorRole, Money, ProfitSharingResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use store::{get_json, key_segment, list_json, put_json, KvStore, StoreError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Customer,
    Vendor,
    Admin,
    Recipient,
    Platform,
}

impl From<ActorRole> for PartyRole {
    fn from(role: ActorRole) -> Self {
        match role {
            ActorRole::Customer => PartyRole::Customer,
            ActorRole::Vendor => PartyRole::Vendor,
            ActorRole::Admin => PartyRole::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Applied,
    /// Written but not credited until the recipient opens an account.
    PendingRegistration,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardLedgerEntry {
    pub party_id: String,
    pub party_role: PartyRole,
    pub transaction_id: String,
    pub delta: Money,
    pub applied_at: DateTime<Utc>,
    pub status: EntryStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Everyone who can be credited for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parties {
    pub payer_id: String,
    pub payer_role: ActorRole,
    pub recipient: Option<RecipientParty>,
    /// Account collecting platform fees.
    pub platform_account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientParty {
    pub id: String,
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartyStatus {
    Applied,
    AlreadyApplied,
    PendingRegistration,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutcome {
    pub transaction_id: String,
    pub per_party: BTreeMap<String, PartyStatus>,
}

impl LedgerOutcome {
    pub fn success(&self) -> bool {
        self.failed_parties().is_empty()
    }

    pub fn failed_parties(&self) -> Vec<String> {
        self.per_party
            .iter()
            .filter(|(_, s)| matches!(s, PartyStatus::Failed { .. }))
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[derive(Debug, Error)]
#[error("could not apply reward for {party_id}: {source}")]
pub struct LedgerApplyError {
    pub party_id: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credit {
    party_id: String,
    role: PartyRole,
    amount: Money,
    pending: bool,
}

/// Who gets what. Amounts for the same party are folded into one credit.
fn plan_credits(split: &ProfitSharingResult, parties: &Parties) -> Vec<Credit> {
    let payer = |amount| Credit {
        party_id: parties.payer_id.clone(),
        role: parties.payer_role.into(),
        amount,
        pending: false,
    };
    let recipient_or_payer = |amount| match &parties.recipient {
        Some(r) => Credit {
            party_id: r.id.clone(),
            role: PartyRole::Recipient,
            amount,
            pending: !r.registered,
        },
        None => payer(amount),
    };
    let platform = |amount| Credit {
        party_id: parties.platform_account.clone(),
        role: PartyRole::Platform,
        amount,
        pending: false,
    };

    let raw = match *split {
        ProfitSharingResult::Vendor {
            vendor_profit,
            customer_cashback,
        } => vec![payer(vendor_profit), recipient_or_payer(customer_cashback)],
        ProfitSharingResult::Admin {
            customer_cashback,
            admin_bonus,
        } => vec![payer(customer_cashback), payer(admin_bonus)],
        ProfitSharingResult::CustomerSelf {
            customer_cashback,
            platform_fee,
        } => vec![payer(customer_cashback), platform(platform_fee)],
        ProfitSharingResult::CustomerThirdParty {
            payer_reward,
            recipient_reward,
            platform_fee,
        } => vec![
            payer(payer_reward),
            recipient_or_payer(recipient_reward),
            platform(platform_fee),
        ],
    };

    let mut folded: Vec<Credit> = Vec::new();
    for credit in raw.into_iter().filter(|c| !c.amount.is_zero()) {
        match folded.iter_mut().find(|c| c.party_id == credit.party_id) {
            Some(existing) => existing.amount += credit.amount,
            None => folded.push(credit),
        }
    }
    folded
}

fn party_prefix(party_id: &str) -> Result<String, StoreError> {
    Ok(format!("ledger/{}/", key_segment(party_id)?))
}

fn entry_key(party_id: &str, transaction_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}{}", party_prefix(party_id)?, key_segment(transaction_id)?))
}

pub struct RewardLedger {
    store: Arc<dyn KvStore>,
    party_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RewardLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            party_locks: Mutex::new(HashMap::new()),
        }
    }

    fn party_lock(&self, party_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .party_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(party_id.to_string()).or_default())
    }

    /// Credit every party of `split`. Never fails as a whole: each party gets
    /// its own status and failures for one party do not stop the others.
    pub fn apply_rewards(
        &self,
        transaction_id: &str,
        split: &ProfitSharingResult,
        parties: &Parties,
    ) -> LedgerOutcome {
        let mut per_party = BTreeMap::new();

        for credit in plan_credits(split, parties) {
            let status = match self.apply_one(transaction_id, &credit) {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        party = %credit.party_id,
                        error = %err,
                        "reward not applied"
                    );
                    PartyStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            per_party.insert(credit.party_id.clone(), status);
        }

        LedgerOutcome {
            transaction_id: transaction_id.to_string(),
            per_party,
        }
    }

    fn apply_one(&self, transaction_id: &str, credit: &Credit) -> Result<PartyStatus, LedgerApplyError> {
        let wrap = |source| LedgerApplyError {
            party_id: credit.party_id.clone(),
            source,
        };
        let key = entry_key(&credit.party_id, transaction_id).map_err(wrap)?;

        let lock = self.party_lock(&credit.party_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let existing: Option<RewardLedgerEntry> = get_json(self.store.as_ref(), &key).map_err(wrap)?;
        if let Some(entry) = existing {
            if entry.status != EntryStatus::Failed {
                tracing::debug!(party = %credit.party_id, transaction_id, "reward already recorded");
                return Ok(PartyStatus::AlreadyApplied);
            }
        }

        let status = if credit.pending {
            EntryStatus::PendingRegistration
        } else {
            EntryStatus::Applied
        };
        let entry = RewardLedgerEntry {
            party_id: credit.party_id.clone(),
            party_role: credit.role,
            transaction_id: transaction_id.to_string(),
            delta: credit.amount,
            applied_at: Utc::now(),
            status,
            error: None,
        };
        // Only reached when there is no entry yet or the last try failed,
        // so a failure marker never replaces a recorded credit.
        if let Err(source) = put_json(self.store.as_ref(), &key, &entry) {
            self.record_failure(&key, entry, &source);
            return Err(wrap(source));
        }

        tracing::info!(
            party = %credit.party_id,
            transaction_id,
            amount = %credit.amount,
            pending = credit.pending,
            "reward recorded"
        );
        Ok(match status {
            EntryStatus::PendingRegistration => PartyStatus::PendingRegistration,
            _ => PartyStatus::Applied,
        })
    }

    /// Best effort: leaves a `failed` entry so a retry knows to re-apply.
    fn record_failure(&self, key: &str, mut entry: RewardLedgerEntry, err: &StoreError) {
        entry.status = EntryStatus::Failed;
        entry.error = Some(err.to_string());
        if let Err(e) = put_json(self.store.as_ref(), key, &entry) {
            tracing::warn!(key, error = %e, "failure marker not written");
        }
    }

    pub fn entries_for_party(&self, party_id: &str) -> Result<Vec<RewardLedgerEntry>, StoreError> {
        list_json(self.store.as_ref(), &party_prefix(party_id)?)
    }

    /// Sum of applied entries. Pending and failed entries are not credited.
    pub fn balance(&self, party_id: &str) -> Result<Money, StoreError> {
        Ok(self
            .entries_for_party(party_id)?
            .into_iter()
            .filter(|e| e.status == EntryStatus::Applied)
            .map(|e| e.delta)
            .sum())
    }

    /// Entries waiting for their recipient to register; read by the
    /// reconciliation job.
    pub fn pending_registrations(&self) -> Result<Vec<RewardLedgerEntry>, StoreError> {
        Ok(list_json::<RewardLedgerEntry>(self.store.as_ref(), "ledger/")?
            .into_iter()
            .filter(|e| e.status == EntryStatus::PendingRegistration)
            .collect())
    }
}
