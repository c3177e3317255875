//! PetStore - lifecycle controller and non-blocking front door
//!
//! TigerStyle: One explicit state machine around one backend.
//!
//! ```text
//! Uninitialized ─prepare─▶ Prepared ─reset?─▶ Reset ─patch─▶ Patched ─▶ Ready ─close─▶ Closed
//! ```
//!
//! Construction drives the backend through prepare, the optional hard reset
//! and the schema patch before any data operation is accepted, so a reset can
//! never race a read or write. Once `Ready`, every data operation is queued
//! to a worker task and returns immediately; results come back through
//! callbacks, failures through the error side channel.

mod event;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::callback::{Delivery, ResultSink};
use crate::config::StoreConfig;
use crate::pet::PetData;
use crate::storage::{PetStorage, StorageError, StorageResult, LEADERBOARD_LENGTH_MAX, SCHEMA_VERSION_CURRENT};

pub use event::{StoreEvent, ERROR_CHANNEL_CAPACITY};
use event::ErrorReporter;
use worker::{Op, Worker};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// How long `close` waits for in-flight operations before abandoning them
pub const CLOSE_DRAIN_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Lifecycle
// =============================================================================

/// Where a store is in its life. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Backend constructed, nothing opened
    Uninitialized,
    /// Storage created or opened
    Prepared,
    /// All pet records wiped
    Reset,
    /// Schema at the running version
    Patched,
    /// Accepting data operations
    Ready,
    /// Backend released
    Closed,
}

impl LifecycleState {
    fn advance(&mut self, next: Self, backend: &str) {
        assert!(
            next > *self,
            "lifecycle cannot move from {:?} to {:?}",
            self,
            next
        );
        tracing::debug!(backend, from = ?self, to = ?next, "store lifecycle");
        *self = next;
    }
}

// =============================================================================
// PetStore
// =============================================================================

/// A pet store over one backend.
pub struct PetStore {
    backend: Arc<dyn PetStorage>,
    state: Mutex<LifecycleState>,
    ops: mpsc::UnboundedSender<Op>,
    worker: Mutex<Option<JoinHandle<()>>>,
    delivery: Delivery,
    closed: Arc<AtomicBool>,
    errors: ErrorReporter,
    drain_timeout: Duration,
}

impl PetStore {
    /// Bring a backend to `Ready`.
    ///
    /// Runs `prepare`, then `reset` if `config.hard_reset` is set, then
    /// `patch`. The hard-reset flag is cleared only after `reset` succeeds, so
    /// an interrupted reset is retried on the next start. On success
    /// `config.schema_version` holds the running version; the host should
    /// persist `config` afterwards.
    ///
    /// Any failure closes the backend and is returned; the store is unusable.
    pub async fn open(
        backend: Arc<dyn PetStorage>,
        config: &mut StoreConfig,
        delivery: Delivery,
    ) -> StorageResult<Self> {
        let name = backend.name();
        let mut state = LifecycleState::Uninitialized;

        if let Err(e) = Self::bring_up(&backend, config, &mut state).await {
            tracing::error!(
                backend = name,
                state = ?state,
                fatal = e.is_fatal(),
                error = %e,
                "store failed to open"
            );
            backend.close().await;
            return Err(e);
        }

        state.advance(LifecycleState::Ready, name);
        tracing::info!(backend = name, version = SCHEMA_VERSION_CURRENT, "pet store ready");

        let (ops, rx) = mpsc::unbounded_channel();
        let errors = ErrorReporter::new();
        let worker = tokio::spawn(Worker::new(Arc::clone(&backend), rx, errors.clone()).run());

        Ok(Self {
            backend,
            state: Mutex::new(state),
            ops,
            worker: Mutex::new(Some(worker)),
            delivery,
            closed: Arc::new(AtomicBool::new(false)),
            errors,
            drain_timeout: Duration::from_millis(CLOSE_DRAIN_TIMEOUT_MS),
        })
    }

    async fn bring_up(
        backend: &Arc<dyn PetStorage>,
        config: &mut StoreConfig,
        state: &mut LifecycleState,
    ) -> StorageResult<()> {
        let name = backend.name();

        backend.prepare().await?;
        state.advance(LifecycleState::Prepared, name);

        if config.hard_reset {
            tracing::warn!(backend = name, "hard reset requested, erasing all pets");
            backend.reset().await?;
            let was_set = config.clear_hard_reset();
            assert!(was_set, "hard reset flag must be cleared exactly once");
            state.advance(LifecycleState::Reset, name);
        }

        let from = Self::recorded_version(backend, config).await?;
        backend.patch(&from).await?;
        config.schema_version = Some(SCHEMA_VERSION_CURRENT.to_string());
        state.advance(LifecycleState::Patched, name);

        Ok(())
    }

    /// The version storage is at: the backend's own marker when it has one,
    /// else what the host recorded, else a fresh store at the running version.
    async fn recorded_version(
        backend: &Arc<dyn PetStorage>,
        config: &StoreConfig,
    ) -> StorageResult<String> {
        let stored = backend.stored_version().await?;
        let version = match (stored, config.schema_version.as_ref()) {
            (Some(stored), Some(recorded)) => {
                if &stored != recorded {
                    tracing::warn!(
                        stored = %stored,
                        recorded = %recorded,
                        "config schema version disagrees with storage, trusting storage"
                    );
                }
                stored
            }
            (Some(stored), None) => stored,
            (None, Some(recorded)) => recorded.clone(),
            (None, None) => SCHEMA_VERSION_CURRENT.to_string(),
        };
        Ok(version)
    }

    /// Override how long `close` waits for in-flight work.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// Whether data operations are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Subscribe to failures that happen off the caller's path.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<StoreEvent> {
        self.errors.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink<T: Send + 'static>(
        &self,
        op: &'static str,
        on_result: impl FnOnce(T) + Send + 'static,
    ) -> ResultSink<T> {
        ResultSink::new(
            op,
            Box::new(on_result),
            self.delivery.clone(),
            Arc::clone(&self.closed),
        )
    }

    /// Queue an operation if the store is ready, else report it as closed.
    fn submit(&self, op_name: &'static str, op: Op) {
        let state = self.lock_state();
        if *state != LifecycleState::Ready {
            drop(state);
            op.discard();
            self.errors.report(op_name, None, StorageError::Closed);
            return;
        }
        if let Err(rejected) = self.ops.send(op) {
            drop(state);
            rejected.0.discard();
            self.errors.report(op_name, None, StorageError::Closed);
        }
    }

    // =========================================================================
    // Data operations
    // =========================================================================

    /// Insert the pet, or overwrite every field of the pet with its identity.
    ///
    /// Fire-and-forget: failures go to the error side channel.
    pub fn register_pet(&self, data: PetData) {
        self.submit("register_pet", Op::Register(data));
    }

    /// Delete a pet if it exists.
    pub fn unregister_pet(&self, owner_name: impl Into<String>, pet_name: impl Into<String>) {
        self.submit(
            "unregister_pet",
            Op::Unregister {
                owner: owner_name.into(),
                pet: pet_name.into(),
            },
        );
    }

    /// Fetch every pet of `owner_name`. An unknown owner yields an empty list.
    pub fn load<F>(&self, owner_name: impl Into<String>, on_result: F)
    where
        F: FnOnce(Vec<PetData>) + Send + 'static,
    {
        let sink = self.sink("load", on_result);
        self.submit(
            "load",
            Op::Load {
                owner: owner_name.into(),
                sink,
            },
        );
    }

    /// Fetch the names of the owner's pets, optionally of one entity type.
    pub fn get_player_pets<F>(
        &self,
        owner_name: impl Into<String>,
        entity_filter: Option<&str>,
        on_result: F,
    ) where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        let sink = self.sink("get_player_pets", on_result);
        self.submit(
            "get_player_pets",
            Op::PlayerPets {
                owner: owner_name.into(),
                entity: entity_filter.map(str::to_string),
                sink,
            },
        );
    }

    /// Fetch one page of pets ranked by level, then points.
    ///
    /// `length` above [`LEADERBOARD_LENGTH_MAX`] is capped; a zero length
    /// yields an empty page.
    pub fn get_pets_leaderboard<F>(
        &self,
        offset: usize,
        length: usize,
        entity_filter: Option<&str>,
        on_result: F,
    ) where
        F: FnOnce(Vec<PetData>) + Send + 'static,
    {
        if length > LEADERBOARD_LENGTH_MAX {
            tracing::debug!(
                requested = length,
                max = LEADERBOARD_LENGTH_MAX,
                "capping leaderboard page length"
            );
        }
        let length = length.min(LEADERBOARD_LENGTH_MAX);

        let sink = self.sink("get_pets_leaderboard", on_result);
        self.submit(
            "get_pets_leaderboard",
            Op::Leaderboard {
                offset,
                length,
                entity: entity_filter.map(str::to_string),
                sink,
            },
        );
    }

    /// Flip the enabled flag of one pet, or of all the owner's pets.
    ///
    /// `on_result` fires once the flip is durable, with the number of pets
    /// flipped.
    pub fn toggle_pets<F>(&self, owner_name: impl Into<String>, pet_name: Option<&str>, on_result: F)
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let sink = self.sink("toggle_pets", on_result);
        self.submit(
            "toggle_pets",
            Op::Toggle {
                owner: owner_name.into(),
                pet: pet_name.map(str::to_string),
                sink,
            },
        );
    }

    /// Rename a pet. A name already taken by the owner is reported as
    /// `DuplicateIdentity` on the error side channel.
    pub fn update_pet_name(
        &self,
        owner_name: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) {
        self.submit(
            "update_pet_name",
            Op::Rename {
                owner: owner_name.into(),
                old: old_name.into(),
                new: new_name.into(),
            },
        );
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stop accepting work, drain in-flight operations, release the backend.
    ///
    /// Idempotent. Work still running after the drain timeout is abandoned
    /// and its callbacks are dropped.
    pub async fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == LifecycleState::Closed {
                return;
            }
            state.advance(LifecycleState::Closed, self.backend.name());
            // Sent under the lock: everything accepted before is ahead of it
            let _ = self.ops.send(Op::Shutdown);
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut worker) = worker {
            match tokio::time::timeout(self.drain_timeout, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "store worker failed"),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.drain_timeout.as_millis() as u64,
                        "in-flight pet operations did not finish, abandoning them"
                    );
                    self.closed.store(true, Ordering::SeqCst);
                    worker.abort();
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        self.backend.close().await;
        tracing::info!(backend = self.backend.name(), "pet store closed");
    }
}

impl Drop for PetStore {
    fn drop(&mut self) {
        if self.state() != LifecycleState::Closed {
            tracing::warn!(backend = self.backend.name(), "pet store dropped without close");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
