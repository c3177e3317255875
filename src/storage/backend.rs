//! PetStorage - the contract every backend implements.
//!
//! Backends expose plain async methods returning [`StorageResult`]. The
//! callback protocol, the error side channel and the lifecycle ordering are
//! layered on top by [`crate::PetStore`]; a backend only has to get the data
//! semantics right.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{self, Migration, SCHEMA_VERSION_CURRENT};
use crate::pet::PetData;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Largest leaderboard page a backend will serve; longer requests are capped
pub const LEADERBOARD_LENGTH_MAX: usize = 100;

// =============================================================================
// PetStorage
// =============================================================================

/// Durable operations a pet-management feature needs, backend-agnostic.
///
/// Lifecycle methods (`prepare`, `patch`, `reset`, `close`) are driven by the
/// store controller only. Absence is never an error: reads of unknown owners
/// return empty collections and deletes of unknown pets succeed.
#[async_trait]
pub trait PetStorage: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Create or open the underlying storage. Idempotent.
    async fn prepare(&self) -> StorageResult<()>;

    /// The schema version marker persisted by this backend, if any.
    async fn stored_version(&self) -> StorageResult<Option<String>>;

    /// Persist a schema version marker.
    async fn write_version(&self, version: &str) -> StorageResult<()>;

    /// Apply one migration step to the stored data.
    async fn apply_migration(&self, step: Migration) -> StorageResult<()>;

    /// Bring storage from `current_version` up to the running version.
    ///
    /// The marker is written after every step so an interrupted patch
    /// resumes where it stopped.
    async fn patch(&self, current_version: &str) -> StorageResult<()> {
        let steps = schema::plan(current_version)?;
        if steps.is_empty() {
            tracing::debug!(backend = self.name(), version = current_version, "schema up to date");
        }
        for step in steps {
            tracing::info!(backend = self.name(), %step, "applying schema migration");
            self.apply_migration(step).await?;
            self.write_version(step.to_version()).await?;
        }
        self.write_version(SCHEMA_VERSION_CURRENT).await
    }

    /// Erase every pet record. Leaves the version marker alone.
    async fn reset(&self) -> StorageResult<()>;

    /// Release all resources. Never fails, safe after a partial `prepare`.
    async fn close(&self);

    /// Insert, or overwrite every field of the pet with the same identity.
    async fn register_pet(&self, data: &PetData) -> StorageResult<()>;

    /// Delete a pet if present.
    async fn unregister_pet(&self, owner_name: &str, pet_name: &str) -> StorageResult<()>;

    /// Every pet owned by `owner_name`, ordered by pet name.
    async fn load(&self, owner_name: &str) -> StorageResult<Vec<PetData>>;

    /// Names of the owner's pets, optionally of one entity type only.
    async fn get_player_pets(
        &self,
        owner_name: &str,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<String>>;

    /// One page of the leaderboard. `length` is capped at
    /// [`LEADERBOARD_LENGTH_MAX`]; a zero length yields an empty page.
    async fn get_pets_leaderboard(
        &self,
        offset: usize,
        length: usize,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<PetData>>;

    /// Flip the enabled flag of one pet, or of all the owner's pets when
    /// `pet_name` is `None`. Returns how many pets were flipped.
    async fn toggle_pets(&self, owner_name: &str, pet_name: Option<&str>) -> StorageResult<usize>;

    /// Rename a pet. Fails with `DuplicateIdentity` when `new_name` is taken.
    async fn update_pet_name(
        &self,
        owner_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> StorageResult<()>;
}

/// Requested page length, capped at [`LEADERBOARD_LENGTH_MAX`].
pub(crate) fn page_length(length: usize) -> usize {
    length.min(LEADERBOARD_LENGTH_MAX)
}

/// Sort pets into leaderboard order and cut out `[offset, offset + length)`.
///
/// Shared by backends that rank in process rather than in a query.
pub(crate) fn leaderboard_page(
    mut pets: Vec<PetData>,
    offset: usize,
    length: usize,
) -> Vec<PetData> {
    let length = page_length(length);
    if length == 0 {
        return Vec::new();
    }

    pets.sort_by(PetData::leaderboard_cmp);
    let page: Vec<PetData> = pets.into_iter().skip(offset).take(length).collect();

    // Postcondition
    assert!(page.len() <= length, "page exceeds requested length");
    page
}

// =============================================================================
// Tests
// =============================================================================
