use std::sync::Arc;

use super::{LocalDirBackend, MemoryBackend, StorageBackend, StorageError};
use crate::config::{BackendConfig, Config};
use crate::error::{Result, ScatterError};
use crate::placement::BackendRoster;

pub fn open_backend(name: &str, cfg: &BackendConfig) -> Result<Arc<dyn StorageBackend>> {
    match cfg {
        BackendConfig::Local { path } => {
            let b = LocalDirBackend::new(name, path).map_err(|e| match e {
                StorageError::Io(io) => ScatterError::Io(io),
                other => ScatterError::BackendUnavailable {
                    backend: name.to_string(),
                    reason: other.to_string(),
                },
            })?;
            Ok(Arc::new(b))
        }
        BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new(name))),
    }
}

/// Build the ordered roster named by `backend_roster`.
pub fn roster_from_config(cfg: &Config) -> Result<BackendRoster> {
    let mut backends = Vec::with_capacity(cfg.backend_roster.len());
    for name in &cfg.backend_roster {
        let bc = cfg.backends.get(name).ok_or_else(|| {
            ScatterError::Config(format!("backend '{name}' has no entry in backends"))
        })?;
        backends.push(open_backend(name, bc)?);
    }
    BackendRoster::new(backends)
}
