//! Pet Record Model
//!
//! TigerStyle: Explicit types, validation, builder pattern.
//!
//! A pet is keyed by its identity, the `(owner_name, pet_name)` pair. Every
//! other field is mutable state that an upsert overwrites wholesale.

use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, StorageResult};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Maximum owner or pet name length in bytes
pub const NAME_BYTES_MAX: usize = 64;

/// Default display scale of a freshly registered pet
pub const PET_SIZE_DEFAULT: f64 = 1.0;

/// Level a freshly registered pet starts at
pub const PET_LEVEL_DEFAULT: u32 = 1;

// =============================================================================
// Identity
// =============================================================================

/// The unique key of a stored pet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PetIdentity {
    /// Player that owns the pet
    pub owner_name: String,
    /// Name of the pet, unique per owner
    pub pet_name: String,
}

impl PetIdentity {
    /// Build an identity, validating both names.
    pub fn new(owner_name: impl Into<String>, pet_name: impl Into<String>) -> StorageResult<Self> {
        let owner_name = owner_name.into();
        let pet_name = pet_name.into();
        validate_name(&owner_name)?;
        validate_name(&pet_name)?;
        Ok(Self {
            owner_name,
            pet_name,
        })
    }
}

impl std::fmt::Display for PetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner_name, self.pet_name)
    }
}

/// Check that a name can be used as half of an identity.
pub fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > NAME_BYTES_MAX {
        return Err(StorageError::InvalidName(format!(
            "name {} bytes exceeds max {}",
            name.len(),
            NAME_BYTES_MAX
        )));
    }
    Ok(())
}

// =============================================================================
// PetData
// =============================================================================

/// Persisted state of one pet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetData {
    /// Player that owns the pet
    pub owner_name: String,
    /// Name of the pet
    pub pet_name: String,
    /// Species / entity type, e.g. "Wolf"
    pub entity_name: String,
    /// Display scale
    #[serde(default = "default_size")]
    pub size: f64,
    /// Whether the pet renders as a baby
    #[serde(default)]
    pub baby: bool,
    /// Current level
    #[serde(default = "default_level")]
    pub level: u32,
    /// Points accumulated toward the next level
    #[serde(default)]
    pub level_points: u32,
    /// Whether the pet carries a chest
    #[serde(default)]
    pub chested: bool,
    /// Enabled/disabled flag flipped by toggling
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Serialized chest inventory, opaque to storage
    #[serde(default)]
    pub inventory: Option<String>,
}

fn default_size() -> f64 {
    PET_SIZE_DEFAULT
}

fn default_level() -> u32 {
    PET_LEVEL_DEFAULT
}

fn default_visible() -> bool {
    true
}

impl PetData {
    /// Create a pet with default state.
    #[must_use]
    pub fn new(
        owner_name: impl Into<String>,
        pet_name: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        Self::builder(owner_name, pet_name, entity_name).build()
    }

    /// Create a builder for a pet with non-default state.
    #[must_use]
    pub fn builder(
        owner_name: impl Into<String>,
        pet_name: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> PetDataBuilder {
        PetDataBuilder::new(owner_name.into(), pet_name.into(), entity_name.into())
    }

    /// The storage key of this pet.
    #[must_use]
    pub fn identity(&self) -> PetIdentity {
        PetIdentity {
            owner_name: self.owner_name.clone(),
            pet_name: self.pet_name.clone(),
        }
    }

    /// Validate identity fields before the record is handed to a backend.
    pub fn validate(&self) -> StorageResult<()> {
        validate_name(&self.owner_name)?;
        validate_name(&self.pet_name)?;
        Ok(())
    }

    /// Whether this pet matches an optional entity filter.
    ///
    /// An empty filter matches everything.
    #[must_use]
    pub fn matches_entity(&self, entity_filter: Option<&str>) -> bool {
        match entity_filter {
            Some(filter) if !filter.is_empty() => self.entity_name == filter,
            _ => true,
        }
    }

    /// Leaderboard ordering: level desc, points desc, then owner and pet
    /// name ascending so equal scores come out in a stable order.
    #[must_use]
    pub fn leaderboard_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .level
            .cmp(&self.level)
            .then_with(|| other.level_points.cmp(&self.level_points))
            .then_with(|| self.owner_name.cmp(&other.owner_name))
            .then_with(|| self.pet_name.cmp(&other.pet_name))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for PetData with fluent API.
#[derive(Debug)]
pub struct PetDataBuilder {
    data: PetData,
}

impl PetDataBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(owner_name: String, pet_name: String, entity_name: String) -> Self {
        Self {
            data: PetData {
                owner_name,
                pet_name,
                entity_name,
                size: PET_SIZE_DEFAULT,
                baby: false,
                level: PET_LEVEL_DEFAULT,
                level_points: 0,
                chested: false,
                visible: true,
                inventory: None,
            },
        }
    }

    /// Set level.
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.data.level = level;
        self
    }

    /// Set level points.
    #[must_use]
    pub fn with_level_points(mut self, points: u32) -> Self {
        self.data.level_points = points;
        self
    }

    /// Set display scale.
    #[must_use]
    pub fn with_size(mut self, size: f64) -> Self {
        assert!(size > 0.0, "size must be positive, got {size}");
        self.data.size = size;
        self
    }

    /// Mark as baby.
    #[must_use]
    pub fn with_baby(mut self, baby: bool) -> Self {
        self.data.baby = baby;
        self
    }

    /// Mark as chested.
    #[must_use]
    pub fn with_chested(mut self, chested: bool) -> Self {
        self.data.chested = chested;
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.data.visible = visible;
        self
    }

    /// Set the inventory blob.
    #[must_use]
    pub fn with_inventory(mut self, inventory: String) -> Self {
        self.data.inventory = Some(inventory);
        self
    }

    /// Build the record.
    #[must_use]
    pub fn build(self) -> PetData {
        self.data
    }
}

// =============================================================================
// Tests
// =============================================================================
