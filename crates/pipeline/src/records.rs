//! Persisted receipts and their delivery attempts, queryable by transaction,
//! party or receipt number without any pipeline state.

use mvne_core::{DeliveryAttempt, Receipt, ReceiptDeliveryStatus};
use std::sync::{Arc, Mutex};
use store::{get_json, key_segment, list_json, put_json, KvStore, StoreError};

fn receipt_key(transaction_id: &str) -> Result<String, StoreError> {
    Ok(format!("receipt/{}", key_segment(transaction_id)?))
}

fn party_prefix(party_id: &str) -> Result<String, StoreError> {
    Ok(format!("receipt-party/{}/", key_segment(party_id)?))
}

fn attempt_prefix(receipt_number: &str) -> Result<String, StoreError> {
    Ok(format!("attempt/{}/", key_segment(receipt_number)?))
}

#[derive(Clone)]
pub struct ReceiptRecords {
    store: Arc<dyn KvStore>,
    append_lock: Arc<Mutex<()>>,
}

impl ReceiptRecords {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Stores the receipt and indexes it under the payer and, for
    /// third-party purchases, the recipient.
    pub fn save(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let tx_segment = key_segment(&receipt.transaction_id)?;
        put_json(self.store.as_ref(), &receipt_key(tx_segment)?, receipt)?;

        let mut parties = vec![receipt.payer.id.as_str()];
        if let Some(r) = &receipt.recipient {
            parties.push(r.contact.id.as_str());
        }
        for party in parties {
            put_json(
                self.store.as_ref(),
                &format!("{}{}", party_prefix(party)?, tx_segment),
                &receipt.transaction_id,
            )?;
        }
        Ok(())
    }

    pub fn by_transaction(&self, transaction_id: &str) -> Result<Option<Receipt>, StoreError> {
        get_json(self.store.as_ref(), &receipt_key(transaction_id)?)
    }

    pub fn for_party(&self, party_id: &str) -> Result<Vec<Receipt>, StoreError> {
        let ids: Vec<String> = list_json(self.store.as_ref(), &party_prefix(party_id)?)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(receipt) = self.by_transaction(&id)? {
                out.push(receipt);
            }
        }
        out.sort_by_key(|r| r.created_at);
        out.reverse();
        Ok(out)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.store.list_by_prefix("receipt/")?.len())
    }

    /// Appends to the attempt log; existing attempts are never rewritten.
    /// Sequence numbers follow the stored count, so appends are serialized.
    pub fn append_attempts(&self, receipt_number: &str, attempts: &[DeliveryAttempt]) -> Result<(), StoreError> {
        let prefix = attempt_prefix(receipt_number)?;
        let _guard = self.append_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = self.store.list_by_prefix(&prefix)?.len();
        for (offset, attempt) in attempts.iter().enumerate() {
            put_json(self.store.as_ref(), &format!("{}{:06}", prefix, start + offset), attempt)?;
        }
        Ok(())
    }

    pub fn attempts(&self, receipt_number: &str) -> Result<Vec<DeliveryAttempt>, StoreError> {
        list_json(self.store.as_ref(), &attempt_prefix(receipt_number)?)
    }

    /// Records the delivery outcome on the stored receipt.
    pub fn finish_delivery(
        &self,
        receipt: &mut Receipt,
        status: ReceiptDeliveryStatus,
        attempts: &[DeliveryAttempt],
    ) -> Result<(), StoreError> {
        receipt.delivery_status = status;
        receipt.attempts.extend_from_slice(attempts);
        self.append_attempts(&receipt.number, attempts)?;
        put_json(self.store.as_ref(), &receipt_key(&receipt.transaction_id)?, receipt)
    }
}
