//! Settlement of confirmed purchases: reward split, ledger update, receipt
//! composition and receipt delivery with fallback.

mod audit;
pub mod delivery;
pub mod directory;
pub mod ledger;
pub mod orchestrator;
pub mod records;

pub use audit::{AuditEvent, AuditLog};
pub use delivery::{DeliveryReport, DeliveryRouter, DeliveryState};
pub use directory::{DirectoryError, RecipientDirectory, SavedRecipient};
pub use ledger::{
    EntryStatus, LedgerOutcome, Parties, PartyRole, PartyStatus, RecipientParty, RewardLedger,
    RewardLedgerEntry,
};
pub use orchestrator::{
    PipelineSettings, SettlementError, SettlementPipeline, SettlementReport, SettlementRequest,
    SettlementWarning,
};
pub use records::ReceiptRecords;
