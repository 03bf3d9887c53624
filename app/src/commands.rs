use anyhow::{Context, Result};
use pipeline::{SettlementPipeline, SettlementRequest};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const SUGGESTION_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct InboxFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Every `*.json` settlement envelope under `dir`, sorted by path.
pub fn scan_inbox(dir: &Path) -> Result<Vec<InboxFile>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    let mut result = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.path();
        if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
            if ext.eq_ignore_ascii_case("json") {
                let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
                result.push(InboxFile {
                    path: p.to_path_buf(),
                    size_bytes,
                });
            }
        }
    }
    result.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

pub fn read_request(path: &Path) -> Result<SettlementRequest> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let request = serde_json::from_str(&raw).with_context(|| format!("Malformed envelope {}", path.display()))?;
    Ok(request)
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessSummary {
    pub settled: usize,
    pub with_warnings: usize,
    pub rejected: usize,
}

/// Settles every envelope in `dir` concurrently. Bad envelopes are
/// counted as rejected; they never stop the batch.
pub async fn process(pipeline: Arc<SettlementPipeline>, dir: &Path) -> Result<ProcessSummary> {
    let files = scan_inbox(dir)?;
    tracing::info!(dir = %dir.display(), files = files.len(), "processing inbox");

    let mut summary = ProcessSummary::default();
    let mut handles = Vec::new();
    for file in files {
        match read_request(&file.path) {
            Ok(request) => handles.push((file.path, pipeline.spawn(request))),
            Err(e) => {
                tracing::error!(path = %file.path.display(), error = %e, "skipping envelope");
                summary.rejected += 1;
            }
        }
    }

    for (path, handle) in handles {
        match handle.await {
            Ok(Ok(report)) => {
                if report.is_clean() {
                    summary.settled += 1;
                } else {
                    summary.with_warnings += 1;
                }
                println!("{}: {}", path.display(), report.user_message());
            }
            Ok(Err(e)) => {
                summary.rejected += 1;
                println!("{}: rejected: {}", path.display(), e);
            }
            Err(e) => {
                summary.rejected += 1;
                tracing::error!(path = %path.display(), error = %e, "settlement task failed");
            }
        }
    }
    Ok(summary)
}

pub fn show_receipt(pipeline: &SettlementPipeline, transaction_id: &str) -> Result<()> {
    let receipt = pipeline
        .records()
        .by_transaction(transaction_id)?
        .with_context(|| format!("No receipt for transaction {transaction_id}"))?;
    println!("{}", receipt.render_text());
    println!("Delivery: {:?}", receipt.delivery_status);
    for attempt in pipeline.records().attempts(&receipt.number)? {
        println!(
            "  {} {} -> {} ({})",
            attempt.timestamp.to_rfc3339(),
            attempt.channel.as_str(),
            attempt.target,
            attempt.outcome.as_str()
        );
    }
    Ok(())
}

pub fn show_balance(pipeline: &SettlementPipeline, party_id: &str) -> Result<()> {
    let balance = pipeline.ledger().balance(party_id)?;
    println!("{party_id}: {balance}");
    for entry in pipeline.ledger().entries_for_party(party_id)? {
        println!("  {} {} {:?}", entry.transaction_id, entry.delta, entry.status);
    }
    Ok(())
}

pub fn suggest(pipeline: &SettlementPipeline, partial: &str) -> Result<()> {
    for saved in pipeline.directory().suggest(partial, SUGGESTION_LIMIT)? {
        let mark = if saved.verified { "✓" } else { " " };
        println!(
            "{mark} {} {} (used {}x)",
            saved.phone, saved.display_name, saved.frequency
        );
    }
    Ok(())
}

pub fn forget(pipeline: &SettlementPipeline, phone: &str) -> Result<()> {
    if pipeline.directory().remove(phone)? {
        println!("Removed {phone}");
    } else {
        println!("{phone} is not saved");
    }
    Ok(())
}
