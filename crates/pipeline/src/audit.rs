use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub transaction_id: String,
    pub state: String,
    pub receipt_number: Option<String>,
    pub party: Option<String>,
    pub amount: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, transaction_id: &str, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            transaction_id: transaction_id.to_string(),
            state: state.to_string(),
            receipt_number: None,
            party: None,
            amount: None,
            error: None,
        }
    }

    pub fn with_receipt(mut self, receipt_number: &str) -> Self {
        self.receipt_number = Some(receipt_number.to_string());
        self
    }

    pub fn with_party(mut self, party: &str) -> Self {
        self.party = Some(party.to_string());
        self
    }

    pub fn with_amount(mut self, amount: impl ToString) -> Self {
        self.amount = Some(amount.to_string());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Append-only JSON-lines audit trail. `None` path disables it.
#[derive(Debug, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    fn write_event(&self, event: &AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string(event)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type=%event.event_type, transaction_id=%event.transaction_id, "Audit event written");
        Ok(())
    }

    /// Best effort; a failing audit write never affects settlement.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write_event(&event) {
            tracing::warn!(event_type=%event.event_type, error=%e, "audit write failed");
        }
    }
}
