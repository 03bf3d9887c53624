use anyhow::{Context, Result};
use channel::RetryPolicy;
use mvne_core::RateTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_NAME: &str = "mvne-settlement";
const KEYCHAIN_SERVICE: &str = "mvne.settlement.credentials";

/// Secret names looked up in the environment first, then the keychain.
pub const CHAT_API_KEY: &str = "chat_api_key";
pub const CHAT_CLIENT_SECRET: &str = "chat_client_secret";
pub const EMAIL_RELAY_KEY: &str = "email_relay_key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// `null` disables the audit trail.
    #[serde(default = "default_audit_path")]
    pub audit_path: Option<PathBuf>,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_directory_capacity")]
    pub directory_capacity: usize,
    #[serde(default = "default_platform_account")]
    pub platform_account: String,
    #[serde(default)]
    pub rates: RateTable,
    #[serde(default)]
    pub delivery: RetryPolicy,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            audit_path: default_audit_path(),
            country_code: default_country_code(),
            directory_capacity: default_directory_capacity(),
            platform_account: default_platform_account(),
            rates: RateTable::default(),
            delivery: RetryPolicy::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub primary: PrimaryChannelConfig,
    #[serde(default)]
    pub email: EmailChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryChannelConfig {
    #[serde(default = "default_primary_kind")]
    pub kind: String, // "mock" | "chat_api"
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    pub token_url: Option<String>,
}

impl Default for PrimaryChannelConfig {
    fn default() -> Self {
        Self {
            kind: default_primary_kind(),
            base_url: None,
            client_id: None,
            token_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default = "default_email_kind")]
    pub kind: String, // "none" | "mock" | "relay"
    pub relay_url: Option<String>,
    pub from_address: Option<String>,
}

impl Default for EmailChannelConfig {
    fn default() -> Self {
        Self {
            kind: default_email_kind(),
            relay_url: None,
            from_address: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("mvne-settlement.db")
}

fn default_audit_path() -> Option<PathBuf> {
    Some(PathBuf::from("audit.jsonl"))
}

fn default_country_code() -> String {
    mvne_core::phone::DEFAULT_COUNTRY_CODE.to_string()
}

fn default_directory_capacity() -> usize {
    50
}

fn default_platform_account() -> String {
    "platform".to_string()
}

fn default_primary_kind() -> String {
    "mock".to_string()
}

fn default_email_kind() -> String {
    "none".to_string()
}

impl AppConfig {
    /// Rejects rate tables and limits the pipeline could not run with.
    pub fn validate(&self) -> Result<()> {
        self.rates.validate().context("Invalid rate table")?;
        if self.directory_capacity == 0 {
            anyhow::bail!("directory_capacity must be at least 1");
        }
        if self.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("country_code must be digits, got {:?}", self.country_code);
        }
        Ok(())
    }
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// `MVNE_<KEY>` from the environment, else the keychain entry.
pub fn resolve_secret(key: &str) -> Option<String> {
    let var = format!("MVNE_{}", key.to_ascii_uppercase());
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| get_secret(key).ok())
}
