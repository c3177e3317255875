//! MemoryBackend - in-process storage
//!
//! TigerStyle: Reference implementation of the contract with deterministic
//! fault injection for the error paths.
//!
//! Clones share the same data, so a test can drop a store, reopen it over a
//! clone and observe what survived.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{leaderboard_page, PetStorage};
use super::error::{StorageError, StorageResult};
use super::schema::Migration;
use crate::pet::{PetData, PetIdentity};

// =============================================================================
// Faults
// =============================================================================

/// Switches that make the next calls of a kind fail.
#[derive(Debug, Default)]
struct Faults {
    prepare: AtomicBool,
    reset: AtomicBool,
    writes: AtomicBool,
    reads: AtomicBool,
    read_delay_ms: AtomicU64,
}

// =============================================================================
// MemoryBackend
// =============================================================================

#[derive(Debug, Default)]
struct State {
    open: bool,
    version: Option<String>,
    pets: BTreeMap<PetIdentity, PetData>,
    migrations_applied: Vec<Migration>,
    close_count: usize,
}

/// In-memory pet storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
}

impl MemoryBackend {
    /// Create an empty backend with no version marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose storage already carries a version marker.
    #[must_use]
    pub fn with_version(version: &str) -> Self {
        let state = State {
            version: Some(version.to_string()),
            ..State::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            faults: Arc::default(),
        }
    }

    /// Make `prepare` fail as if the medium were unreachable.
    pub fn fail_prepare(&self, fail: bool) {
        self.faults.prepare.store(fail, Ordering::SeqCst);
    }

    /// Make `reset` fail.
    pub fn fail_reset(&self, fail: bool) {
        self.faults.reset.store(fail, Ordering::SeqCst);
    }

    /// Make every data write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }

    /// Make every data read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every read, to hold operations in flight.
    pub fn set_read_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.read_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of stored pets.
    pub async fn len(&self) -> usize {
        self.state.read().await.pets.len()
    }

    /// Whether no pets are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Migration steps applied so far, in order.
    pub async fn migrations_applied(&self) -> Vec<Migration> {
        self.state.read().await.migrations_applied.clone()
    }

    /// How many times `close` ran.
    pub async fn close_count(&self) -> usize {
        self.state.read().await.close_count
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.faults.writes.load(Ordering::SeqCst) {
            return Err(StorageError::write("injected write fault"));
        }
        Ok(())
    }

    async fn check_read(&self) -> StorageResult<()> {
        let delay_ms = self.faults.read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(StorageError::read("injected read fault"));
        }
        Ok(())
    }
}

fn ensure_open(state: &State) -> StorageResult<()> {
    if state.open {
        Ok(())
    } else {
        Err(StorageError::Closed)
    }
}

#[async_trait]
impl PetStorage for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn prepare(&self) -> StorageResult<()> {
        if self.faults.prepare.load(Ordering::SeqCst) {
            return Err(StorageError::init("injected prepare fault"));
        }
        self.state.write().await.open = true;
        Ok(())
    }

    async fn stored_version(&self) -> StorageResult<Option<String>> {
        Ok(self.state.read().await.version.clone())
    }

    async fn write_version(&self, version: &str) -> StorageResult<()> {
        self.state.write().await.version = Some(version.to_string());
        Ok(())
    }

    async fn apply_migration(&self, step: Migration) -> StorageResult<()> {
        let mut state = self.state.write().await;
        ensure_open(&state)?;
        // Records are typed values, fields added by a step already exist
        state.migrations_applied.push(step);
        Ok(())
    }

    async fn reset(&self) -> StorageResult<()> {
        if self.faults.reset.load(Ordering::SeqCst) {
            return Err(StorageError::write("injected reset fault"));
        }
        let mut state = self.state.write().await;
        ensure_open(&state)?;
        state.pets.clear();
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.write().await;
        state.open = false;
        state.close_count += 1;
    }

    async fn register_pet(&self, data: &PetData) -> StorageResult<()> {
        self.check_write()?;
        data.validate()?;
        let mut state = self.state.write().await;
        ensure_open(&state)?;
        state.pets.insert(data.identity(), data.clone());
        Ok(())
    }

    async fn unregister_pet(&self, owner_name: &str, pet_name: &str) -> StorageResult<()> {
        self.check_write()?;
        let identity = PetIdentity::new(owner_name, pet_name)?;
        let mut state = self.state.write().await;
        ensure_open(&state)?;
        state.pets.remove(&identity);
        Ok(())
    }

    async fn load(&self, owner_name: &str) -> StorageResult<Vec<PetData>> {
        self.check_read().await?;
        let state = self.state.read().await;
        ensure_open(&state)?;
        Ok(state
            .pets
            .values()
            .filter(|p| p.owner_name == owner_name)
            .cloned()
            .collect())
    }

    async fn get_player_pets(
        &self,
        owner_name: &str,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<String>> {
        self.check_read().await?;
        let state = self.state.read().await;
        ensure_open(&state)?;
        Ok(state
            .pets
            .values()
            .filter(|p| p.owner_name == owner_name && p.matches_entity(entity_filter))
            .map(|p| p.pet_name.clone())
            .collect())
    }

    async fn get_pets_leaderboard(
        &self,
        offset: usize,
        length: usize,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<PetData>> {
        self.check_read().await?;
        let state = self.state.read().await;
        ensure_open(&state)?;
        let pets: Vec<PetData> = state
            .pets
            .values()
            .filter(|p| p.matches_entity(entity_filter))
            .cloned()
            .collect();
        Ok(leaderboard_page(pets, offset, length))
    }

    async fn toggle_pets(&self, owner_name: &str, pet_name: Option<&str>) -> StorageResult<usize> {
        self.check_write()?;
        let mut state = self.state.write().await;
        ensure_open(&state)?;
        let mut flipped = 0;
        for pet in state.pets.values_mut() {
            if pet.owner_name != owner_name {
                continue;
            }
            if pet_name.is_some_and(|name| pet.pet_name != name) {
                continue;
            }
            pet.visible = !pet.visible;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn update_pet_name(
        &self,
        owner_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> StorageResult<()> {
        self.check_write()?;
        let old = PetIdentity::new(owner_name, old_name)?;
        let new = PetIdentity::new(owner_name, new_name)?;
        if old == new {
            return Ok(());
        }

        let mut state = self.state.write().await;
        ensure_open(&state)?;
        if !state.pets.contains_key(&old) {
            return Ok(());
        }
        if state.pets.contains_key(&new) {
            return Err(StorageError::DuplicateIdentity {
                owner: owner_name.to_string(),
                pet: new_name.to_string(),
            });
        }
        if let Some(mut pet) = state.pets.remove(&old) {
            pet.pet_name = new_name.to_string();
            state.pets.insert(new, pet);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
