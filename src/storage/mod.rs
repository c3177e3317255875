//! Storage - Backend Trait and Implementations
//!
//! TigerStyle: Abstract storage with simulation-first testing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PetStorage Trait                         │
//! └─────────────────────────────────────────────────────────────┘
//!         ↑                      ↑                      ↑
//!         │                      │                      │
//! ┌───────┴───────┐    ┌────────┴────────┐    ┌────────┴────────┐
//! │ MemoryBackend │    │ JsonFileBackend │    │  SqliteBackend  │
//! │   (testing)   │    │   (flat file)   │    │ (feature sqlite)│
//! └───────────────┘    └─────────────────┘    └─────────────────┘
//! ```

mod backend;
mod error;
mod json_file;
mod memory;
pub mod schema;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use backend::{PetStorage, LEADERBOARD_LENGTH_MAX};
pub use error::{StorageError, StorageResult};
pub use json_file::{JsonFileBackend, PETS_FILE_NAME};
pub use memory::MemoryBackend;
pub use schema::{Migration, SCHEMA_VERSIONS, SCHEMA_VERSION_CURRENT};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SQLITE_MEMORY_URL};
