//! Profit sharing: how the markup of a purchase is divided between parties.

use crate::error::ConfigurationError;
use crate::models::{ActorRole, PurchaseMode};
use crate::money::{Money, BPS_WHOLE};
use crate::rates::RateTable;
use serde::{Deserialize, Serialize};

/// Split of a transaction's markup. Each variant carries exactly the
/// components that exist for its role/mode, and they always sum to the markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfitSharingResult {
    Vendor {
        vendor_profit: Money,
        customer_cashback: Money,
    },
    Admin {
        customer_cashback: Money,
        admin_bonus: Money,
    },
    CustomerSelf {
        customer_cashback: Money,
        platform_fee: Money,
    },
    CustomerThirdParty {
        payer_reward: Money,
        recipient_reward: Money,
        platform_fee: Money,
    },
}

impl ProfitSharingResult {
    pub fn total(&self) -> Money {
        match *self {
            ProfitSharingResult::Vendor {
                vendor_profit,
                customer_cashback,
            } => vendor_profit + customer_cashback,
            ProfitSharingResult::Admin {
                customer_cashback,
                admin_bonus,
            } => customer_cashback + admin_bonus,
            ProfitSharingResult::CustomerSelf {
                customer_cashback,
                platform_fee,
            } => customer_cashback + platform_fee,
            ProfitSharingResult::CustomerThirdParty {
                payer_reward,
                recipient_reward,
                platform_fee,
            } => payer_reward + recipient_reward + platform_fee,
        }
    }

    pub fn recipient_reward(&self) -> Option<Money> {
        match *self {
            ProfitSharingResult::CustomerThirdParty {
                recipient_reward, ..
            } => Some(recipient_reward),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProfitSharingResult::Vendor { .. } => "vendor",
            ProfitSharingResult::Admin { .. } => "admin",
            ProfitSharingResult::CustomerSelf { .. } => "customer_self",
            ProfitSharingResult::CustomerThirdParty { .. } => "customer_third_party",
        }
    }
}

/// Split `markup` for a purchase made by `role` in `mode`.
///
/// Rounding remainders go to the party holding the larger, rest-of-pool
/// share (vendor, admin bonus, platform fee), so the components sum to the
/// markup exactly.
pub fn compute_split(
    markup: Money,
    mode: PurchaseMode,
    role: ActorRole,
    rates: &RateTable,
) -> Result<ProfitSharingResult, ConfigurationError> {
    if markup.is_negative() {
        return Err(ConfigurationError::NegativeMarkup(markup));
    }
    rates.validate()?;

    let result = match (role, mode) {
        (ActorRole::Vendor, _) => {
            let customer_cashback = markup.share_bps(BPS_WHOLE - rates.vendor_share_bps);
            ProfitSharingResult::Vendor {
                vendor_profit: markup - customer_cashback,
                customer_cashback,
            }
        }
        (ActorRole::Admin, _) => {
            let customer_cashback = markup.share_bps(rates.admin_cashback_bps);
            ProfitSharingResult::Admin {
                customer_cashback,
                admin_bonus: markup - customer_cashback,
            }
        }
        (ActorRole::Customer, PurchaseMode::SelfPurchase) => {
            let customer_cashback = markup.share_bps(rates.customer_self_bps);
            ProfitSharingResult::CustomerSelf {
                customer_cashback,
                platform_fee: markup - customer_cashback,
            }
        }
        (ActorRole::Customer, PurchaseMode::ThirdParty) => {
            let payer_reward = markup.share_bps(rates.third_party_payer_bps);
            let recipient_reward = markup.share_bps(rates.third_party_recipient_bps);
            ProfitSharingResult::CustomerThirdParty {
                payer_reward,
                recipient_reward,
                platform_fee: markup - payer_reward - recipient_reward,
            }
        }
    };

    debug_assert_eq!(result.total(), markup);
    Ok(result)
}
