use crate::money::Money;
use thiserror::Error;

/// Invalid role/mode input or an inconsistent rate table. Fatal for a
/// settlement: raised before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown actor role: {0}")]
    UnknownRole(String),
    #[error("unknown purchase mode: {0}")]
    UnknownMode(String),
    #[error("markup must not be negative, got {0}")]
    NegativeMarkup(Money),
    #[error("rate {name} is {bps} bps, above 10000")]
    RateOutOfRange { name: &'static str, bps: u32 },
    #[error("third-party rates sum to {total} bps, above 10000")]
    ThirdPartyRatesExceedWhole { total: u32 },
    #[error("third-party purchase without a recipient")]
    MissingRecipient,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("line {name}: subtotal overflows")]
    LineOverflow { name: String },
    #[error("receipt lines sum to {lines} but transaction total is {transaction}")]
    TotalMismatch { lines: Money, transaction: Money },
}
