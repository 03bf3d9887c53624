mod channels;
mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pipeline::{DeliveryRouter, PipelineSettings, SettlementPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use store::SledStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settles confirmed MVNE purchases and delivers their receipts.
#[derive(Debug, Parser)]
#[command(name = "mvne-settle", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Settle every `*.json` envelope under a directory.
    Process { dir: PathBuf },
    /// Print the stored receipt and delivery log of a transaction.
    Receipt { transaction_id: String },
    /// Print a party's reward balance and ledger entries.
    Balance { party_id: String },
    /// Suggest saved recipients for a partial phone number.
    Suggest { partial: String },
    /// Remove a saved recipient.
    Forget { phone: String },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_pipeline(cfg: &config::AppConfig) -> anyhow::Result<Arc<SettlementPipeline>> {
    let store = SledStore::open(&cfg.store_path)
        .with_context(|| format!("Failed to open store at {}", cfg.store_path.display()))?;
    let router = DeliveryRouter::new(
        channels::create_primary_channel(cfg)?,
        channels::create_email_channel(cfg)?,
    );
    let settings = PipelineSettings {
        rates: cfg.rates.clone(),
        platform_account: cfg.platform_account.clone(),
        country_code: cfg.country_code.clone(),
        directory_capacity: cfg.directory_capacity,
        audit_path: cfg.audit_path.clone(),
    };
    let pipeline = SettlementPipeline::new(Arc::new(store), router, settings)?;
    Ok(Arc::new(pipeline))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load()?;
    let pipeline = build_pipeline(&cfg)?;

    match cli.cmd {
        Command::Process { dir } => {
            let summary = commands::process(pipeline, &dir).await?;
            tracing::info!(
                settled = summary.settled,
                with_warnings = summary.with_warnings,
                rejected = summary.rejected,
                "inbox processed"
            );
        }
        Command::Receipt { transaction_id } => commands::show_receipt(&pipeline, &transaction_id)?,
        Command::Balance { party_id } => commands::show_balance(&pipeline, &party_id)?,
        Command::Suggest { partial } => commands::suggest(&pipeline, &partial)?,
        Command::Forget { phone } => commands::forget(&pipeline, &phone)?,
    }
    Ok(())
}
