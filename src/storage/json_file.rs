//! JsonFileBackend - flat-file storage
//!
//! The whole store is one JSON document: the version marker plus every pet.
//! The document is held in memory while open and rewritten on every write
//! through a temp file and a rename, so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use super::backend::{leaderboard_page, PetStorage};
use super::error::{StorageError, StorageResult};
use super::schema::Migration;
use crate::pet::{PetData, PetIdentity};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Default file name inside the data directory
pub const PETS_FILE_NAME: &str = "pets.json";

/// Suffix of the temp file used for atomic rewrites
const TEMP_SUFFIX: &str = "tmp";

// =============================================================================
// Document
// =============================================================================

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PetDocument {
    /// Schema version marker
    #[serde(default)]
    version: Option<String>,
    /// Every stored pet
    #[serde(default)]
    pets: Vec<PetData>,
}

/// Open document, keyed for identity lookups.
#[derive(Debug, Default)]
struct Loaded {
    version: Option<String>,
    pets: BTreeMap<PetIdentity, PetData>,
}

impl Loaded {
    fn to_document(&self) -> PetDocument {
        PetDocument {
            version: self.version.clone(),
            pets: self.pets.values().cloned().collect(),
        }
    }
}

// =============================================================================
// JsonFileBackend
// =============================================================================

/// Pet storage in a single JSON file.
pub struct JsonFileBackend {
    path: PathBuf,
    loaded: RwLock<Option<Loaded>>,
}

impl JsonFileBackend {
    /// Backend over the file at `path`. Nothing is touched until `prepare`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: RwLock::new(None),
        }
    }

    /// Backend over [`PETS_FILE_NAME`] inside `data_dir`.
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(PETS_FILE_NAME))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, loaded: &Loaded) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(&loaded.to_document())?;
        let temp = self.path.with_extension(TEMP_SUFFIX);
        fs::write(&temp, &bytes)
            .await
            .map_err(|e| StorageError::write(format!("failed to write {}: {e}", temp.display())))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::write(format!("failed to replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

fn opened(loaded: &Option<Loaded>) -> StorageResult<&Loaded> {
    loaded.as_ref().ok_or(StorageError::Closed)
}

fn opened_mut(loaded: &mut Option<Loaded>) -> StorageResult<&mut Loaded> {
    loaded.as_mut().ok_or(StorageError::Closed)
}

#[async_trait]
impl PetStorage for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn prepare(&self) -> StorageResult<()> {
        let mut loaded = self.loaded.write().await;
        if loaded.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::init(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let document = match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<PetDocument>(&bytes).map_err(|e| {
                StorageError::init(format!("malformed {}: {e}", self.path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PetDocument::default(),
            Err(e) => {
                return Err(StorageError::init(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let mut pets = BTreeMap::new();
        for pet in document.pets {
            pets.insert(pet.identity(), pet);
        }
        let fresh = Loaded {
            version: document.version,
            pets,
        };
        self.persist(&fresh)
            .await
            .map_err(|e| StorageError::init(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), pets = fresh.pets.len(), "opened pet file");
        *loaded = Some(fresh);
        Ok(())
    }

    async fn stored_version(&self) -> StorageResult<Option<String>> {
        let loaded = self.loaded.read().await;
        Ok(opened(&loaded)?.version.clone())
    }

    async fn write_version(&self, version: &str) -> StorageResult<()> {
        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        loaded.version = Some(version.to_string());
        self.persist(loaded).await
    }

    async fn apply_migration(&self, step: Migration) -> StorageResult<()> {
        // Older documents lack the fields a step adds; deserializing filled
        // in defaults, rewriting makes them explicit on disk.
        let guard = self.loaded.read().await;
        let loaded = opened(&guard)?;
        tracing::debug!(path = %self.path.display(), %step, "rewriting pet file");
        self.persist(loaded).await
    }

    async fn reset(&self) -> StorageResult<()> {
        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        loaded.pets.clear();
        self.persist(loaded).await
    }

    async fn close(&self) {
        if self.loaded.write().await.take().is_some() {
            tracing::debug!(path = %self.path.display(), "closed pet file");
        }
    }

    async fn register_pet(&self, data: &PetData) -> StorageResult<()> {
        data.validate()?;
        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        loaded.pets.insert(data.identity(), data.clone());
        self.persist(loaded).await
    }

    async fn unregister_pet(&self, owner_name: &str, pet_name: &str) -> StorageResult<()> {
        let identity = PetIdentity::new(owner_name, pet_name)?;
        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        if loaded.pets.remove(&identity).is_some() {
            self.persist(loaded).await?;
        }
        Ok(())
    }

    async fn load(&self, owner_name: &str) -> StorageResult<Vec<PetData>> {
        let guard = self.loaded.read().await;
        Ok(opened(&guard)?
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
        let guard = self.loaded.read().await;
        Ok(opened(&guard)?
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
        let guard = self.loaded.read().await;
        let pets: Vec<PetData> = opened(&guard)?
            .pets
            .values()
            .filter(|p| p.matches_entity(entity_filter))
            .cloned()
            .collect();
        Ok(leaderboard_page(pets, offset, length))
    }

    async fn toggle_pets(&self, owner_name: &str, pet_name: Option<&str>) -> StorageResult<usize> {
        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        let mut flipped = 0;
        for pet in loaded.pets.values_mut() {
            if pet.owner_name == owner_name && pet_name.map_or(true, |name| pet.pet_name == name) {
                pet.visible = !pet.visible;
                flipped += 1;
            }
        }
        if flipped > 0 {
            self.persist(loaded).await?;
        }
        Ok(flipped)
    }

    async fn update_pet_name(
        &self,
        owner_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> StorageResult<()> {
        let old = PetIdentity::new(owner_name, old_name)?;
        let new = PetIdentity::new(owner_name, new_name)?;
        if old == new {
            return Ok(());
        }

        let mut guard = self.loaded.write().await;
        let loaded = opened_mut(&mut guard)?;
        if !loaded.pets.contains_key(&old) {
            return Ok(());
        }
        if loaded.pets.contains_key(&new) {
            return Err(StorageError::DuplicateIdentity {
                owner: owner_name.to_string(),
                pet: new_name.to_string(),
            });
        }
        let Some(mut pet) = loaded.pets.remove(&old) else {
            return Ok(());
        };
        pet.pet_name = new_name.to_string();
        loaded.pets.insert(new, pet);
        self.persist(loaded).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::SCHEMA_VERSION_CURRENT;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();

        let backend = JsonFileBackend::in_dir(dir.path());
        backend.prepare().await.unwrap();
        backend.patch(SCHEMA_VERSION_CURRENT).await.unwrap();
        backend
            .register_pet(&PetData::builder("steve", "rex", "Wolf").with_level(3).build())
            .await
            .unwrap();
        backend.close().await;

        let reopened = JsonFileBackend::in_dir(dir.path());
        reopened.prepare().await.unwrap();
        let pets = reopened.load("steve").await.unwrap();
        assert_eq!(pets.len(), 1);
        assert_eq!(pets[0].level, 3);
        assert_eq!(
            reopened.stored_version().await.unwrap().as_deref(),
            Some(SCHEMA_VERSION_CURRENT)
        );
    }

    #[tokio::test]
    async fn test_malformed_file_fails_prepare() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PETS_FILE_NAME);
        std::fs::write(&path, b"{not json").unwrap();

        let backend = JsonFileBackend::new(&path);
        let err = backend.prepare().await.unwrap_err();
        assert!(matches!(err, StorageError::Init(_)));

        // Close after a failed prepare is harmless
        backend.close().await;
    }

    #[tokio::test]
    async fn test_old_document_migrates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PETS_FILE_NAME);
        std::fs::write(
            &path,
            br#"{"version":"1.0.0","pets":[{"owner_name":"steve","pet_name":"rex","entity_name":"Wolf","level":4}]}"#,
        )
        .unwrap();

        let backend = JsonFileBackend::new(&path);
        backend.prepare().await.unwrap();
        let from = backend.stored_version().await.unwrap().unwrap();
        backend.patch(&from).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], SCHEMA_VERSION_CURRENT);
        assert_eq!(raw["pets"][0]["visible"], true);
        assert_eq!(raw["pets"][0]["chested"], false);
    }

    #[tokio::test]
    async fn test_rename_and_toggle_persist() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::in_dir(dir.path());
        backend.prepare().await.unwrap();
        backend.register_pet(&PetData::new("steve", "A", "Wolf")).await.unwrap();
        backend.register_pet(&PetData::new("steve", "B", "Cat")).await.unwrap();

        assert!(matches!(
            backend.update_pet_name("steve", "A", "B").await,
            Err(StorageError::DuplicateIdentity { .. })
        ));
        // Missing source is a no-op even when the target is taken
        backend.update_pet_name("steve", "ghost", "B").await.unwrap();
        backend.update_pet_name("steve", "A", "C").await.unwrap();
        backend.toggle_pets("steve", Some("C")).await.unwrap();
        backend.close().await;

        let reopened = JsonFileBackend::in_dir(dir.path());
        reopened.prepare().await.unwrap();
        let pets = reopened.load("steve").await.unwrap();
        let names: Vec<&str> = pets.iter().map(|p| p.pet_name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert!(pets[0].visible);
        assert!(!pets[1].visible);
    }
}
