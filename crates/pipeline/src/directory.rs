//! Frequently used third-party recipients, keyed by normalized phone number.

use chrono::{DateTime, Utc};
use mvne_core::phone::{normalize_phone, partial_digits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use store::{get_json, list_json, put_json, KvStore, StoreError};
use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 50;

const PREFIX: &str = "recipient/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecipient {
    /// Normalized phone number.
    pub phone: String,
    pub display_name: String,
    pub relationship: Option<String>,
    pub last_used: DateTime<Utc>,
    pub frequency: u32,
    /// Set once a receipt was delivered to this number.
    pub verified: bool,
}

impl SavedRecipient {
    pub fn new(phone: &str, display_name: &str, last_used: DateTime<Utc>) -> Self {
        Self {
            phone: phone.to_string(),
            display_name: display_name.to_string(),
            relationship: None,
            last_used,
            frequency: 1,
            verified: false,
        }
    }

    pub fn with_relationship(mut self, relationship: &str) -> Self {
        self.relationship = Some(relationship.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("not a usable phone number: {0:?}")]
    InvalidPhone(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded recipient memory. Suggestions favour frequent contacts; once the
/// directory is full the least recently used entry makes room.
pub struct RecipientDirectory {
    store: Arc<dyn KvStore>,
    capacity: usize,
    country_code: String,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Held by every write that can add an entry back, and by eviction.
    membership_lock: Mutex<()>,
}

impl RecipientDirectory {
    pub fn new(store: Arc<dyn KvStore>, capacity: usize, country_code: &str) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            country_code: country_code.to_string(),
            key_locks: Mutex::new(HashMap::new()),
            membership_lock: Mutex::new(()),
        }
    }

    pub fn normalize(&self, phone: &str) -> Result<String, DirectoryError> {
        normalize_phone(phone, &self.country_code)
            .ok_or_else(|| DirectoryError::InvalidPhone(phone.to_string()))
    }

    fn key_lock(&self, phone: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(phone.to_string()).or_default())
    }

    fn membership_guard(&self) -> MutexGuard<'_, ()> {
        self.membership_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(phone: &str) -> String {
        format!("{PREFIX}{phone}")
    }

    /// Insert a new contact or bump an existing one: frequency + 1, last use
    /// taken from `candidate`, non-empty details overwrite, verification sticks.
    pub fn upsert(&self, candidate: SavedRecipient) -> Result<SavedRecipient, DirectoryError> {
        let phone = self.normalize(&candidate.phone)?;
        let lock = self.key_lock(&phone);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _membership = self.membership_guard();

        let key = Self::key(&phone);
        let existing: Option<SavedRecipient> = get_json(self.store.as_ref(), &key)?;

        match existing {
            Some(mut entry) => {
                entry.frequency = entry.frequency.saturating_add(1);
                entry.last_used = candidate.last_used;
                if !candidate.display_name.trim().is_empty() {
                    entry.display_name = candidate.display_name;
                }
                if candidate.relationship.is_some() {
                    entry.relationship = candidate.relationship;
                }
                entry.verified |= candidate.verified;
                put_json(self.store.as_ref(), &key, &entry)?;
                Ok(entry)
            }
            None => {
                let entry = SavedRecipient {
                    phone: phone.clone(),
                    frequency: candidate.frequency.max(1),
                    ..candidate
                };
                put_json(self.store.as_ref(), &key, &entry)?;
                self.evict_over_capacity(&phone)?;
                tracing::debug!(phone = %phone, "recipient saved");
                Ok(entry)
            }
        }
    }

    /// Record one more use of `phone` right now.
    pub fn record_use(
        &self,
        phone: &str,
        display_name: &str,
        relationship: Option<&str>,
    ) -> Result<SavedRecipient, DirectoryError> {
        let mut candidate = SavedRecipient::new(phone, display_name, Utc::now());
        candidate.relationship = relationship.map(str::to_string);
        self.upsert(candidate)
    }

    fn evict_over_capacity(&self, keep: &str) -> Result<(), DirectoryError> {
        let mut all: Vec<SavedRecipient> = list_json(self.store.as_ref(), PREFIX)?;
        if all.len() <= self.capacity {
            return Ok(());
        }
        all.retain(|r| r.phone != keep);
        all.sort_by_key(|r| r.last_used);

        let excess = all.len() + 1 - self.capacity;
        for victim in all.into_iter().take(excess) {
            self.store.remove(&Self::key(&victim.phone))?;
            tracing::debug!(phone = %victim.phone, "recipient evicted");
        }
        Ok(())
    }

    pub fn lookup_exact(&self, phone: &str) -> Result<Option<SavedRecipient>, DirectoryError> {
        let phone = self.normalize(phone)?;
        Ok(get_json(self.store.as_ref(), &Self::key(&phone))?)
    }

    /// Candidates for a partially typed number or name, most used first,
    /// most recent breaking ties.
    pub fn suggest(&self, partial: &str, limit: usize) -> Result<Vec<SavedRecipient>, DirectoryError> {
        let digits = partial_digits(partial);
        let needle = partial.trim().to_lowercase();
        let has_letters = needle.chars().any(|c| c.is_alphabetic());

        let mut matches: Vec<SavedRecipient> = list_json::<SavedRecipient>(self.store.as_ref(), PREFIX)?
            .into_iter()
            .filter(|r| {
                if needle.is_empty() {
                    return true;
                }
                let by_phone = !digits.is_empty() && r.phone.contains(&digits);
                let by_name = has_letters && r.display_name.to_lowercase().contains(&needle);
                by_phone || by_name
            })
            .collect();

        matches.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| b.last_used.cmp(&a.last_used))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    pub fn mark_verified(&self, phone: &str) -> Result<bool, DirectoryError> {
        let phone = self.normalize(phone)?;
        let lock = self.key_lock(&phone);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _membership = self.membership_guard();

        let key = Self::key(&phone);
        match get_json::<SavedRecipient>(self.store.as_ref(), &key)? {
            Some(mut entry) => {
                if !entry.verified {
                    entry.verified = true;
                    put_json(self.store.as_ref(), &key, &entry)?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Explicit user deletion.
    pub fn remove(&self, phone: &str) -> Result<bool, DirectoryError> {
        let phone = self.normalize(phone)?;
        let lock = self.key_lock(&phone);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.store.remove(&Self::key(&phone))?)
    }

    pub fn len(&self) -> Result<usize, DirectoryError> {
        Ok(self.store.list_by_prefix(PREFIX)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len()? == 0)
    }
}
