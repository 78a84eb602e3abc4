//! CLI command implementations. Each opens the stores, runs one operation
//! and prints a human-readable result to stdout.

use anyhow::{Context, Result};
use std::path::Path;

use crate::app::App;
use crate::bootstrap::BootstrapReport;
use crate::calc;
use crate::config::Config;
use crate::migrate;
use crate::models::DocumentRecord;
use crate::prompts::TaskType;

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::init_database(config).await?;
    std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "creating data directory {}",
            config.storage.data_dir.display()
        )
    })?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_bootstrap(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let report = app.sync.load_or_create_index().await?;
    print_report(&report);
    app.close().await;
    Ok(())
}

/// Opens the stores and makes the sync manager ready.
async fn open_ready(config: &Config) -> Result<App> {
    let app = App::open(config).await?;
    let report = app.sync.load_or_create_index().await?;
    if !report.attached {
        print_report(&report);
    }
    Ok(app)
}

fn print_report(report: &BootstrapReport) {
    if report.attached {
        println!("Attached to existing index ({} documents).", report.document_count);
        return;
    }
    println!("Bootstrap complete");
    println!("  indexed:   {}", report.indexed);
    println!("  reindexed: {}", report.reindexed);
    println!("  skipped:   {}", report.skipped);
    println!("  failed:    {}", report.failed);
    println!("  documents: {}", report.document_count);
}

fn upload_name(path: &Path, name: Option<&str>) -> Result<String> {
    match name {
        Some(n) => Ok(n.to_string()),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("cannot derive a filename from {}", path.display())),
    }
}

pub async fn run_add(config: &Config, path: &Path, name: Option<&str>) -> Result<()> {
    let filename = upload_name(path, name)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let app = open_ready(config).await?;
    let record = app.sync.add_document(&filename, &bytes).await?;
    println!("added {} (document_id {})", record.filename, record.document_id);
    app.close().await;
    Ok(())
}

pub async fn run_update(config: &Config, path: &Path, name: Option<&str>) -> Result<()> {
    let filename = upload_name(path, name)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let app = open_ready(config).await?;
    let record = app.sync.update_document(&filename, &bytes).await?;
    println!("updated {} (document_id {})", record.filename, record.document_id);
    app.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, filename: &str) -> Result<()> {
    let app = open_ready(config).await?;
    let record = app.sync.delete_document(filename).await?;
    println!("deleted {} (document_id {})", record.filename, record.document_id);
    app.close().await;
    Ok(())
}

pub async fn run_files(config: &Config) -> Result<()> {
    let app = open_ready(config).await?;
    let documents = app.sync.list_documents().await?;
    if documents.is_empty() {
        println!("No documents.");
    } else {
        println!("{:<36}  {:>10}  {:<20}  FILENAME", "DOCUMENT_ID", "BYTES", "MODIFIED");
        for record in &documents {
            print_row(record);
        }
    }
    app.close().await;
    Ok(())
}

fn print_row(record: &DocumentRecord) {
    println!(
        "{:<36}  {:>10}  {:<20}  {}",
        record.document_id,
        record.size_bytes,
        record.modified_at.format("%Y-%m-%d %H:%M:%S"),
        record.filename
    );
}

pub async fn run_reconcile(config: &Config, filename: &str, document_id: &str) -> Result<()> {
    let app = open_ready(config).await?;
    let record = app.sync.reconcile(filename, document_id).await?;
    println!("reconciled {} (document_id {})", record.filename, record.document_id);
    app.close().await;
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    task_type: &str,
    evaluate: bool,
) -> Result<()> {
    let task_type: TaskType = task_type.parse()?;
    let app = open_ready(config).await?;
    let answer = app.assistant.ask(question, task_type, evaluate).await?;
    println!("{}", answer.response);
    if let Some(report) = &answer.evaluation {
        println!();
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    app.close().await;
    Ok(())
}

pub fn run_calc(expression: &str) -> Result<()> {
    let value = calc::evaluate(expression)?;
    println!("{}", calc::format_result(value));
    Ok(())
}
