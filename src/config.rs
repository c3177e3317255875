//! Store Configuration
//!
//! TigerStyle: Host-provided settings as one explicit struct.
//!
//! The host hands a `StoreConfig` to [`crate::PetStore::open`]. The store
//! owns two transitions on it: clearing `hard_reset` once a reset has
//! succeeded, and recording the schema version after a successful patch.
//! Persisting the config afterwards is the host's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::storage::{JsonFileBackend, MemoryBackend, PetStorage};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Environment variable that forces a hard reset on next open
pub const HARD_RESET_ENV: &str = "PETSTORE_HARD_RESET";

/// Default data file for the JSON backend
pub const JSON_PATH_DEFAULT: &str = "~/.petstore/pets.json";

// =============================================================================
// Types
// =============================================================================

/// Which backend a store runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process memory, lost on exit
    Memory,
    /// Single JSON document on disk
    Json {
        /// File path, `~` is expanded
        path: String,
    },
    /// SQLite database (requires the `sqlite` feature)
    Sqlite {
        /// Database URL, e.g. `sqlite://pets.db`
        url: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Json {
            path: JSON_PATH_DEFAULT.to_string(),
        }
    }
}

impl BackendConfig {
    /// Construct the configured backend. Nothing is opened yet.
    pub fn build(&self) -> Result<Arc<dyn PetStorage>, ConfigError> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBackend::new())),
            Self::Json { path } => Ok(Arc::new(JsonFileBackend::new(expand_path(path)))),
            #[cfg(feature = "sqlite")]
            Self::Sqlite { url } => Ok(Arc::new(crate::storage::SqliteBackend::new(
                shellexpand::tilde(url).to_string(),
            ))),
            #[cfg(not(feature = "sqlite"))]
            Self::Sqlite { .. } => Err(ConfigError::BackendUnavailable("sqlite".to_string())),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Settings supplied by the host at construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Wipe every pet on next open; cleared once the wipe succeeds
    pub hard_reset: bool,
    /// Schema version recorded after the last successful patch
    pub schema_version: Option<String>,
    /// Backend selection
    pub backend: BackendConfig,
}

impl StoreConfig {
    /// Config for an in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: BackendConfig::Memory,
            ..Self::default()
        }
    }

    /// Request a hard reset on next open.
    #[must_use]
    pub fn with_hard_reset(mut self, hard_reset: bool) -> Self {
        self.hard_reset = hard_reset;
        self
    }

    /// Set the previously recorded schema version.
    #[must_use]
    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }

    /// Load from a JSON file. A missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| ConfigError::Invalid {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Write as pretty JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    /// Apply overrides from the environment.
    ///
    /// `PETSTORE_HARD_RESET` set to `1`/`true`/`yes` requests a reset; the
    /// variable can only raise the flag, never clear it.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(HARD_RESET_ENV) {
            if matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes") {
                tracing::warn!("hard reset requested via {}", HARD_RESET_ENV);
                self.hard_reset = true;
            }
        }
    }

    /// Clear the hard-reset flag. Returns whether it was set.
    ///
    /// Idempotent: a second call is a no-op returning false.
    pub fn clear_hard_reset(&mut self) -> bool {
        std::mem::replace(&mut self.hard_reset, false)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file is not valid JSON for `StoreConfig`.
    #[error("invalid config file {path}: {source}")]
    Invalid {
        /// File that failed to parse
        path: PathBuf,
        /// Parser error
        source: serde_json::Error,
    },

    /// Configured backend was not compiled into this build.
    #[error("backend {0} not compiled in")]
    BackendUnavailable(String),

    /// IO error reading or writing the config file.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================
