//! Schema versions and the migration plan between them.
//!
//! Every backend walks the same ordered list of steps in `patch`. A backend
//! decides what each step means for its medium (an `ALTER TABLE`, a document
//! rewrite, or nothing at all) but may never skip one.

use super::error::{StorageError, StorageResult};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Every schema version this build knows, oldest first
pub const SCHEMA_VERSIONS: &[&str] = &["1.0.0", "1.1.0", "1.2.0"];

/// Version this build runs
pub const SCHEMA_VERSION_CURRENT: &str = "1.2.0";

// =============================================================================
// Migration
// =============================================================================

/// One step between two adjacent schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// 1.0.0 -> 1.1.0: chest flag and inventory blob
    AddChestState,
    /// 1.1.0 -> 1.2.0: enabled/disabled flag used by toggling
    AddVisibility,
}

/// Steps in the order they must run.
const MIGRATIONS: &[Migration] = &[Migration::AddChestState, Migration::AddVisibility];

impl Migration {
    /// Version this step starts from.
    #[must_use]
    pub fn from_version(self) -> &'static str {
        match self {
            Self::AddChestState => "1.0.0",
            Self::AddVisibility => "1.1.0",
        }
    }

    /// Version this step produces.
    #[must_use]
    pub fn to_version(self) -> &'static str {
        match self {
            Self::AddChestState => "1.1.0",
            Self::AddVisibility => "1.2.0",
        }
    }
}

impl std::fmt::Display for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from_version(), self.to_version())
    }
}

/// Steps needed to bring `from` up to [`SCHEMA_VERSION_CURRENT`].
///
/// Empty when `from` is already current. Unknown versions, including ones
/// newer than this build, are rejected.
pub fn plan(from: &str) -> StorageResult<Vec<Migration>> {
    let index = SCHEMA_VERSIONS
        .iter()
        .position(|v| *v == from)
        .ok_or_else(|| StorageError::UnsupportedSchema {
            found: from.to_string(),
            current: SCHEMA_VERSION_CURRENT.to_string(),
        })?;

    let steps: Vec<Migration> = MIGRATIONS[index..].to_vec();

    // Postcondition: the chain is contiguous and ends at current
    let mut at = from;
    for step in &steps {
        assert_eq!(step.from_version(), at, "migration chain broken at {step}");
        at = step.to_version();
    }
    assert_eq!(at, SCHEMA_VERSION_CURRENT, "migration chain must end at current");

    Ok(steps)
}

// =============================================================================
// Tests
// =============================================================================
