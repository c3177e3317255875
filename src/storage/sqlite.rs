//! SqliteBackend - relational storage
//!
//! TigerStyle: Real database storage through a sqlx connection pool.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS pets (
//!     owner_name TEXT NOT NULL,
//!     pet_name TEXT NOT NULL,
//!     entity_name TEXT NOT NULL,
//!     size REAL NOT NULL DEFAULT 1.0,
//!     baby INTEGER NOT NULL DEFAULT 0,
//!     level INTEGER NOT NULL DEFAULT 1,
//!     level_points INTEGER NOT NULL DEFAULT 0,
//!     chested INTEGER NOT NULL DEFAULT 0,     -- since 1.1.0
//!     inventory TEXT,                         -- since 1.1.0
//!     visible INTEGER NOT NULL DEFAULT 1,     -- since 1.2.0
//!     PRIMARY KEY (owner_name, pet_name)
//! );
//! CREATE TABLE IF NOT EXISTS schema_meta (
//!     id INTEGER PRIMARY KEY CHECK (id = 1),
//!     version TEXT NOT NULL
//! );
//! ```
//!
//! Databases written before `schema_meta` existed have the 1.0.0 layout.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::RwLock;

use super::backend::{page_length, PetStorage};
use super::error::{StorageError, StorageResult};
use super::schema::{Migration, SCHEMA_VERSIONS, SCHEMA_VERSION_CURRENT};
use crate::pet::{PetData, PetIdentity};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Pool size for file databases
const POOL_CONNECTIONS_MAX: u32 = 4;

/// URL of a private in-memory database
pub const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

const CREATE_PETS_TABLE: &str = r#"
    CREATE TABLE pets (
        owner_name TEXT NOT NULL,
        pet_name TEXT NOT NULL,
        entity_name TEXT NOT NULL,
        size REAL NOT NULL DEFAULT 1.0,
        baby INTEGER NOT NULL DEFAULT 0,
        level INTEGER NOT NULL DEFAULT 1,
        level_points INTEGER NOT NULL DEFAULT 0,
        chested INTEGER NOT NULL DEFAULT 0,
        inventory TEXT,
        visible INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (owner_name, pet_name)
    )
"#;

const CREATE_META_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_meta (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version TEXT NOT NULL
    )
"#;

// =============================================================================
// SqliteBackend
// =============================================================================

/// SQLite pet storage.
pub struct SqliteBackend {
    url: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteBackend {
    /// Backend over a database URL such as `sqlite://pets.db`.
    ///
    /// Nothing is opened until `prepare`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        assert!(!url.is_empty(), "database url cannot be empty");
        Self {
            url,
            pool: RwLock::new(None),
        }
    }

    /// Backend over a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(SQLITE_MEMORY_URL)
    }

    async fn pool(&self) -> StorageResult<SqlitePool> {
        self.pool.read().await.clone().ok_or(StorageError::Closed)
    }

    async fn connect(&self) -> StorageResult<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(|e| StorageError::init(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        // An in-memory database lives and dies with its single connection
        let connections = if self.url == SQLITE_MEMORY_URL {
            1
        } else {
            POOL_CONNECTIONS_MAX
        };

        SqlitePoolOptions::new()
            .max_connections(connections)
            .min_connections(if connections == 1 { 1 } else { 0 })
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::init(format!("failed to connect: {e}")))
    }

    async fn init_schema(pool: &SqlitePool) -> StorageResult<()> {
        let pets_exists: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'pets'",
        )
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::init(format!("failed to inspect schema: {e}")))?;

        let meta_exists: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
        )
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::init(format!("failed to inspect schema: {e}")))?;

        sqlx::query(CREATE_META_TABLE)
            .execute(pool)
            .await
            .map_err(|e| StorageError::init(format!("failed to create schema: {e}")))?;

        match (pets_exists.is_some(), meta_exists.is_some()) {
            (false, _) => {
                sqlx::query(CREATE_PETS_TABLE)
                    .execute(pool)
                    .await
                    .map_err(|e| StorageError::init(format!("failed to create schema: {e}")))?;
                set_version(pool, SCHEMA_VERSION_CURRENT).await?;
            }
            (true, false) => {
                tracing::info!("found pets table without version marker, assuming oldest layout");
                set_version(pool, SCHEMA_VERSIONS[0]).await?;
            }
            (true, true) => {}
        }
        Ok(())
    }
}

async fn set_version(pool: &SqlitePool, version: &str) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO schema_meta (id, version) VALUES (1, ?1)
        ON CONFLICT (id) DO UPDATE SET version = excluded.version
        "#,
    )
    .bind(version)
    .execute(pool)
    .await
    .map_err(|e| StorageError::write(format!("failed to write schema version: {e}")))?;
    Ok(())
}

// =============================================================================
// Row Mapping
// =============================================================================

fn read_u32(row: &SqliteRow, column: &str) -> StorageResult<u32> {
    let value: i64 = row
        .try_get(column)
        .map_err(|e| StorageError::read(e.to_string()))?;
    u32::try_from(value).map_err(|_| StorageError::read(format!("{column} out of range: {value}")))
}

/// Parse a database row into a PetData.
fn row_to_pet(row: &SqliteRow) -> StorageResult<PetData> {
    let get_err = |e: sqlx::Error| StorageError::read(e.to_string());

    Ok(PetData {
        owner_name: row.try_get("owner_name").map_err(get_err)?,
        pet_name: row.try_get("pet_name").map_err(get_err)?,
        entity_name: row.try_get("entity_name").map_err(get_err)?,
        size: row.try_get("size").map_err(get_err)?,
        baby: row.try_get("baby").map_err(get_err)?,
        level: read_u32(row, "level")?,
        level_points: read_u32(row, "level_points")?,
        chested: row.try_get("chested").map_err(get_err)?,
        visible: row.try_get("visible").map_err(get_err)?,
        inventory: row.try_get("inventory").map_err(get_err)?,
    })
}

// =============================================================================
// PetStorage Implementation
// =============================================================================

#[async_trait]
impl PetStorage for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn prepare(&self) -> StorageResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let pool = self.connect().await?;
        if let Err(e) = Self::init_schema(&pool).await {
            pool.close().await;
            return Err(e);
        }
        *guard = Some(pool);
        Ok(())
    }

    async fn stored_version(&self) -> StorageResult<Option<String>> {
        let pool = self.pool().await?;
        sqlx::query_scalar("SELECT version FROM schema_meta WHERE id = 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| StorageError::read(format!("failed to read schema version: {e}")))
    }

    async fn write_version(&self, version: &str) -> StorageResult<()> {
        let pool = self.pool().await?;
        set_version(&pool, version).await
    }

    async fn apply_migration(&self, step: Migration) -> StorageResult<()> {
        let pool = self.pool().await?;
        let statements: &[&str] = match step {
            Migration::AddChestState => &[
                "ALTER TABLE pets ADD COLUMN chested INTEGER NOT NULL DEFAULT 0",
                "ALTER TABLE pets ADD COLUMN inventory TEXT",
            ],
            Migration::AddVisibility => {
                &["ALTER TABLE pets ADD COLUMN visible INTEGER NOT NULL DEFAULT 1"]
            }
        };

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StorageError::write(format!("failed to begin migration: {e}")))?;
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::write(format!("migration {step} failed: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::write(format!("failed to commit migration {step}: {e}")))
    }

    async fn reset(&self) -> StorageResult<()> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM pets")
            .execute(&pool)
            .await
            .map_err(|e| StorageError::write(format!("failed to clear pets: {e}")))?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    async fn register_pet(&self, data: &PetData) -> StorageResult<()> {
        data.validate()?;
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO pets (owner_name, pet_name, entity_name, size, baby, level,
                              level_points, chested, inventory, visible)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (owner_name, pet_name) DO UPDATE SET
                entity_name = excluded.entity_name,
                size = excluded.size,
                baby = excluded.baby,
                level = excluded.level,
                level_points = excluded.level_points,
                chested = excluded.chested,
                inventory = excluded.inventory,
                visible = excluded.visible
            "#,
        )
        .bind(&data.owner_name)
        .bind(&data.pet_name)
        .bind(&data.entity_name)
        .bind(data.size)
        .bind(data.baby)
        .bind(i64::from(data.level))
        .bind(i64::from(data.level_points))
        .bind(data.chested)
        .bind(&data.inventory)
        .bind(data.visible)
        .execute(&pool)
        .await
        .map_err(|e| StorageError::write(format!("failed to register pet: {e}")))?;

        Ok(())
    }

    async fn unregister_pet(&self, owner_name: &str, pet_name: &str) -> StorageResult<()> {
        let identity = PetIdentity::new(owner_name, pet_name)?;
        let pool = self.pool().await?;

        sqlx::query("DELETE FROM pets WHERE owner_name = ?1 AND pet_name = ?2")
            .bind(&identity.owner_name)
            .bind(&identity.pet_name)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::write(format!("failed to unregister pet: {e}")))?;

        Ok(())
    }

    async fn load(&self, owner_name: &str) -> StorageResult<Vec<PetData>> {
        let pool = self.pool().await?;

        let rows = sqlx::query("SELECT * FROM pets WHERE owner_name = ?1 ORDER BY pet_name")
            .bind(owner_name)
            .fetch_all(&pool)
            .await
            .map_err(|e| StorageError::read(format!("failed to load pets: {e}")))?;

        rows.iter().map(row_to_pet).collect()
    }

    async fn get_player_pets(
        &self,
        owner_name: &str,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<String>> {
        let pool = self.pool().await?;

        let names: Vec<String> = match entity_filter.filter(|f| !f.is_empty()) {
            Some(entity) => {
                sqlx::query_scalar(
                    r#"
                    SELECT pet_name FROM pets
                    WHERE owner_name = ?1 AND entity_name = ?2
                    ORDER BY pet_name
                    "#,
                )
                .bind(owner_name)
                .bind(entity)
                .fetch_all(&pool)
                .await
            }
            None => {
                sqlx::query_scalar("SELECT pet_name FROM pets WHERE owner_name = ?1 ORDER BY pet_name")
                    .bind(owner_name)
                    .fetch_all(&pool)
                    .await
            }
        }
        .map_err(|e| StorageError::read(format!("failed to list pets: {e}")))?;

        Ok(names)
    }

    async fn get_pets_leaderboard(
        &self,
        offset: usize,
        length: usize,
        entity_filter: Option<&str>,
    ) -> StorageResult<Vec<PetData>> {
        let length = page_length(length);
        if length == 0 {
            return Ok(Vec::new());
        }

        let pool = self.pool().await?;
        let limit = i64::try_from(length).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = match entity_filter.filter(|f| !f.is_empty()) {
            Some(entity) => {
                sqlx::query(
                    r#"
                    SELECT * FROM pets
                    WHERE entity_name = ?1
                    ORDER BY level DESC, level_points DESC, owner_name, pet_name
                    LIMIT ?2 OFFSET ?3
                    "#,
                )
                .bind(entity)
                .bind(limit)
                .bind(offset)
                .fetch_all(&pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM pets
                    ORDER BY level DESC, level_points DESC, owner_name, pet_name
                    LIMIT ?1 OFFSET ?2
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&pool)
                .await
            }
        }
        .map_err(|e| StorageError::read(format!("failed to read leaderboard: {e}")))?;

        let page: Vec<PetData> = rows.iter().map(row_to_pet).collect::<StorageResult<_>>()?;

        // Postcondition
        assert!(page.len() <= length, "page exceeds requested length");

        Ok(page)
    }

    async fn toggle_pets(&self, owner_name: &str, pet_name: Option<&str>) -> StorageResult<usize> {
        let pool = self.pool().await?;

        let result = match pet_name {
            Some(pet) => {
                sqlx::query(
                    "UPDATE pets SET visible = NOT visible WHERE owner_name = ?1 AND pet_name = ?2",
                )
                .bind(owner_name)
                .bind(pet)
                .execute(&pool)
                .await
            }
            None => {
                sqlx::query("UPDATE pets SET visible = NOT visible WHERE owner_name = ?1")
                    .bind(owner_name)
                    .execute(&pool)
                    .await
            }
        }
        .map_err(|e| StorageError::write(format!("failed to toggle pets: {e}")))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
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

        let pool = self.pool().await?;
        let write_err = |e: sqlx::Error| StorageError::write(format!("failed to rename pet: {e}"));

        let mut tx = pool.begin().await.map_err(write_err)?;
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT pet_name FROM pets WHERE owner_name = ?1 AND pet_name = ?2",
        )
        .bind(&old.owner_name)
        .bind(&old.pet_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_err)?;

        if existing.is_none() {
            return Ok(());
        }

        let taken: Option<String> = sqlx::query_scalar(
            "SELECT pet_name FROM pets WHERE owner_name = ?1 AND pet_name = ?2",
        )
        .bind(&new.owner_name)
        .bind(&new.pet_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_err)?;

        if taken.is_some() {
            return Err(StorageError::DuplicateIdentity {
                owner: new.owner_name,
                pet: new.pet_name,
            });
        }

        sqlx::query("UPDATE pets SET pet_name = ?1 WHERE owner_name = ?2 AND pet_name = ?3")
            .bind(&new.pet_name)
            .bind(&old.owner_name)
            .bind(&old.pet_name)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        tx.commit().await.map_err(write_err)
    }
}

// =============================================================================
// Tests
// =============================================================================
