use crate::error::ConfigurationError;
use crate::money::BPS_WHOLE;
use serde::{Deserialize, Serialize};

/// Reward rates in basis points of the markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    /// Vendor purchases: vendor share; the customer gets the rest as cashback.
    #[serde(default = "default_vendor_share")]
    pub vendor_share_bps: u32,
    /// Admin purchases: cashback share; the rest is the admin bonus.
    #[serde(default = "default_admin_cashback")]
    pub admin_cashback_bps: u32,
    /// Customer self purchases: cashback share; the rest is a platform fee.
    #[serde(default = "default_customer_self")]
    pub customer_self_bps: u32,
    /// Customer third-party purchases: payer share.
    #[serde(default = "default_third_party_payer")]
    pub third_party_payer_bps: u32,
    /// Customer third-party purchases: new-contact share for the recipient.
    #[serde(default = "default_third_party_recipient")]
    pub third_party_recipient_bps: u32,
}

fn default_vendor_share() -> u32 {
    8_500
}

fn default_admin_cashback() -> u32 {
    8_000
}

fn default_customer_self() -> u32 {
    10_000
}

fn default_third_party_payer() -> u32 {
    5_000
}

fn default_third_party_recipient() -> u32 {
    3_000
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            vendor_share_bps: default_vendor_share(),
            admin_cashback_bps: default_admin_cashback(),
            customer_self_bps: default_customer_self(),
            third_party_payer_bps: default_third_party_payer(),
            third_party_recipient_bps: default_third_party_recipient(),
        }
    }
}

impl RateTable {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let single = [
            ("vendor_share_bps", self.vendor_share_bps),
            ("admin_cashback_bps", self.admin_cashback_bps),
            ("customer_self_bps", self.customer_self_bps),
            ("third_party_payer_bps", self.third_party_payer_bps),
            ("third_party_recipient_bps", self.third_party_recipient_bps),
        ];
        for (name, bps) in single {
            if bps > BPS_WHOLE {
                return Err(ConfigurationError::RateOutOfRange { name, bps });
            }
        }

        let total = self.third_party_payer_bps + self.third_party_recipient_bps;
        if total > BPS_WHOLE {
            return Err(ConfigurationError::ThirdPartyRatesExceedWhole { total });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RateTable::default().validate(), Ok(()));
    }

    #[test]
    fn missing_rates_fall_back_to_defaults() {
        let table: RateTable = serde_json::from_str(r#"{"vendor_share_bps": 9000}"#).unwrap();
        assert_eq!(table.vendor_share_bps, 9_000);
        assert_eq!(table.third_party_recipient_bps, 3_000);
    }

    #[test]
    fn third_party_overcommit_is_rejected() {
        let table = RateTable {
            third_party_payer_bps: 7_000,
            third_party_recipient_bps: 4_000,
            ..RateTable::default()
        };
        assert_eq!(
            table.validate(),
            Err(ConfigurationError::ThirdPartyRatesExceedWhole { total: 11_000 })
        );
    }
}
