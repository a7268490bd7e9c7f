use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScatterError};

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Blobs stored as files under `path`.
    Local { path: PathBuf },
    /// Process-local map; contents vanish on exit.
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size_bytes: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Total put attempts per chunk before it is recorded as failed.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Read each blob back after `put` and compare its checksum.
    pub verify_uploads: bool,
    /// Abort a restore at the first bad chunk instead of checking them all.
    pub restore_strict: bool,
    pub wait_deadline_secs: Option<u64>,
    pub database_path: PathBuf,
    /// Ordered backend names; the order fixes chunk placement.
    pub backend_roster: Vec<String>,
    pub backends: BTreeMap<String, BackendConfig>,
    /// Name of the environment variable holding the key-wrapping passphrase.
    pub master_passphrase_env: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let roster = [
            ("GoogleDrive", "./backup/gdrive"),
            ("Dropbox", "./backup/dropbox"),
            ("OneDrive", "./backup/onedrive"),
        ];
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            worker_count: 4,
            queue_capacity: 8,
            max_retries: 3,
            retry_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            verify_uploads: true,
            restore_strict: true,
            wait_deadline_secs: None,
            database_path: PathBuf::from("backup.db"),
            backend_roster: roster.iter().map(|(n, _)| n.to_string()).collect(),
            backends: roster
                .iter()
                .map(|(n, p)| {
                    (
                        n.to_string(),
                        BackendConfig::Local {
                            path: PathBuf::from(p),
                        },
                    )
                })
                .collect(),
            master_passphrase_env: None,
        }
    }
}

impl Config {
    /// Load a JSON config file; omitted fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&raw)
            .map_err(|e| ScatterError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_pipeline()?;
        if self.backend_roster.is_empty() {
            return Err(ScatterError::Config("backend_roster is empty".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.backend_roster {
            if !seen.insert(name.as_str()) {
                return Err(ScatterError::Config(format!(
                    "backend '{name}' listed twice in backend_roster"
                )));
            }
            if !self.backends.contains_key(name) {
                return Err(ScatterError::Config(format!(
                    "backend '{name}' has no entry in backends"
                )));
            }
        }
        Ok(())
    }

    /// Sizes and counts only; the roster is checked separately so callers
    /// can supply backends built in code.
    pub fn validate_pipeline(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(ScatterError::Config("chunk_size_bytes must be > 0".into()));
        }
        if self.worker_count == 0 {
            return Err(ScatterError::Config("worker_count must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ScatterError::Config("queue_capacity must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(ScatterError::Config("max_retries must be > 0".into()));
        }
        if usize::try_from(self.chunk_size_bytes).is_err() {
            return Err(ScatterError::Config(format!(
                "chunk_size_bytes {} does not fit in memory",
                self.chunk_size_bytes
            )));
        }
        Ok(())
    }

    pub fn wait_deadline(&self) -> Option<Duration> {
        self.wait_deadline_secs.map(Duration::from_secs)
    }
}
