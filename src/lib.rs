//! Petstore - persistence for player-owned pets
//!
//! A store of pet records keyed by `(owner_name, pet_name)`, behind a
//! backend-agnostic contract with interchangeable backends.
//!
//! Features:
//! - Lifecycle controller: prepare, optional hard reset, schema patch, close
//! - Non-blocking operations with exactly-once result callbacks
//! - Error side channel for fire-and-forget writes
//! - Memory, JSON file and (feature `sqlite`) SQLite backends

pub mod callback;
pub mod config;
pub mod pet;
pub mod storage;
pub mod store;

pub use callback::{channel, Callback, Completion, CompletionQueue, Delivery};
pub use config::{BackendConfig, ConfigError, StoreConfig};
pub use pet::{PetData, PetDataBuilder, PetIdentity};
pub use storage::{PetStorage, StorageError, StorageResult, SCHEMA_VERSION_CURRENT};
pub use store::{LifecycleState, PetStore, StoreEvent};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Application name
pub const APP_NAME: &str = "petstore";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
