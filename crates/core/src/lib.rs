pub mod error;
pub mod models;
pub mod money;
pub mod phone;
pub mod rates;
pub mod receipt;
pub mod split;

pub use error::{ConfigurationError, ReceiptError};
pub use models::{
    ActorRole, CartItem, PartyInfo, PaymentStatus, PurchaseMode, RecipientInfo, Transaction,
};
pub use money::Money;
pub use rates::RateTable;
pub use receipt::{
    compose_receipt, AttemptOutcome, DeliveryAttempt, DeliveryChannel, Receipt,
    ReceiptDeliveryStatus, ReceiptNumberAllocator,
};
pub use split::{compute_split, ProfitSharingResult};
