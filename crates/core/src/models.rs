use crate::error::ConfigurationError;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Vendor,
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Vendor => "vendor",
            ActorRole::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(ActorRole::Customer),
            "vendor" => Ok(ActorRole::Vendor),
            "admin" => Ok(ActorRole::Admin),
            other => Err(ConfigurationError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseMode {
    #[serde(rename = "self")]
    SelfPurchase,
    ThirdParty,
}

impl PurchaseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseMode::SelfPurchase => "self",
            PurchaseMode::ThirdParty => "third_party",
        }
    }
}

impl fmt::Display for PurchaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "self" => Ok(PurchaseMode::SelfPurchase),
            "third_party" => Ok(PurchaseMode::ThirdParty),
            other => Err(ConfigurationError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// A purchase as handed over by the payment step. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub payer_id: String,
    pub role: ActorRole,
    pub mode: PurchaseMode,
    pub items: Vec<CartItem>,
    pub total: Money,
    pub provider_cost: Money,
    pub markup: Money,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Contact details for one side of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub id: String,
    pub name: String,
    /// Primary-channel address (normalized phone number).
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The third-party beneficiary of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientInfo {
    #[serde(flatten)]
    pub contact: PartyInfo,
    /// Whether the recipient holds an account that rewards can be credited to.
    pub registered: bool,
    #[serde(default)]
    pub relationship: Option<String>,
}
