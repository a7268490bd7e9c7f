use std::path::{Path, PathBuf};
use std::sync::Arc;

use scatter_core::crypto::keywrap::MasterKey;
use scatter_core::error::Result;
use scatter_core::storage::roster_from_config;
use scatter_core::{
    BackupOrchestrator, Config, FileId, FileRecord, MetadataStore, RestoreOrchestrator,
};
use serde_json::json;
use tracing::debug;

/// Config from `path`, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let cfg = match path {
        Some(p) => Config::load(p)?,
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            cfg
        }
    };
    debug!(
        database = %cfg.database_path.display(),
        backends = ?cfg.backend_roster,
        chunk_size = cfg.chunk_size_bytes,
        "config loaded"
    );
    Ok(cfg)
}

fn master_key(cfg: &Config) -> Result<Option<MasterKey>> {
    cfg.master_passphrase_env
        .as_deref()
        .map(MasterKey::from_env)
        .transpose()
}

fn open_store(cfg: &Config) -> Result<Arc<MetadataStore>> {
    Ok(Arc::new(MetadataStore::open(&cfg.database_path)?))
}

fn to_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| std::io::Error::other(e).into())
}

pub fn handle_backup(cfg: &Config, path: PathBuf) -> Result<i32> {
    let store = open_store(cfg)?;
    let roster = roster_from_config(cfg)?;
    let orchestrator = BackupOrchestrator::new(cfg.clone(), store, roster, master_key(cfg)?)?;
    let report = orchestrator.backup(&path)?;

    println!(
        "file {}: {} ({} chunks, {} bytes)",
        report.file_id, report.status, report.chunk_count, report.file_size
    );
    for f in &report.failures {
        eprintln!("{f}");
    }
    Ok(if report.is_completed() { 0 } else { 1 })
}

pub fn handle_restore(cfg: &Config, file_id: String, output: PathBuf) -> Result<i32> {
    let file_id: FileId = file_id.parse()?;
    let store = open_store(cfg)?;
    let roster = roster_from_config(cfg)?;
    let orchestrator = RestoreOrchestrator::new(cfg, store.clone(), roster, master_key(cfg)?)?;
    let report = match orchestrator.restore(file_id, &output) {
        Ok(report) => report,
        Err(e) => {
            if let Ok(file) = store.get_file(file_id) {
                eprintln!("file {}: {}", file.file_id, file.status);
            }
            return Err(e);
        }
    };

    println!(
        "file {}: {} -> {} ({} bytes)",
        report.file_id,
        report.status,
        output.display(),
        report.bytes_written
    );
    Ok(0)
}

pub fn handle_status(cfg: &Config, file_id: String, json: bool) -> Result<i32> {
    let file_id: FileId = file_id.parse()?;
    let store = open_store(cfg)?;
    let file = store.get_file(file_id)?;
    let chunks = store.list_chunks(file_id)?;

    if json {
        println!("{}", to_json(&json!({ "file": file, "chunks": chunks }))?);
        return Ok(0);
    }

    print_file_header();
    print_file_row(&file);
    if chunks.is_empty() {
        return Ok(0);
    }
    println!();
    println!(
        "{:>6}  {:>10}  {:<12}  {:<9}  {}",
        "INDEX", "SIZE", "BACKEND", "STATUS", "REMOTE ID"
    );
    for c in &chunks {
        println!(
            "{:>6}  {:>10}  {:<12}  {:<9}  {}",
            c.chunk_index, c.chunk_size, c.backend_name, c.status, c.remote_id
        );
    }
    Ok(0)
}

pub fn handle_list(cfg: &Config, json: bool) -> Result<i32> {
    let store = open_store(cfg)?;
    let files = store.list_files()?;

    if json {
        println!("{}", to_json(&json!(files))?);
        return Ok(0);
    }
    print_file_header();
    for f in &files {
        print_file_row(f);
    }
    Ok(0)
}

fn print_file_header() {
    println!(
        "{:>6}  {:<9}  {:>12}  {:>6}  {:<25}  {}",
        "ID", "STATUS", "SIZE", "CHUNKS", "CREATED", "PATH"
    );
}

fn print_file_row(f: &FileRecord) {
    println!(
        "{:>6}  {:<9}  {:>12}  {:>6}  {:<25}  {}",
        f.file_id, f.status, f.file_size, f.chunk_count, f.created_at, f.original_path
    );
}
