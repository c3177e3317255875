//! Operation worker - executes submitted operations against the backend.
//!
//! Writes run one at a time in submission order, so the last registration of
//! an identity wins. Reads are spawned once every write submitted before them
//! has finished, and run concurrently with each other.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::event::ErrorReporter;
use crate::callback::ResultSink;
use crate::pet::PetData;
use crate::storage::PetStorage;

// =============================================================================
// Operations
// =============================================================================

/// Work submitted by the store.
pub(crate) enum Op {
    Register(PetData),
    Unregister {
        owner: String,
        pet: String,
    },
    Toggle {
        owner: String,
        pet: Option<String>,
        sink: ResultSink<usize>,
    },
    Rename {
        owner: String,
        old: String,
        new: String,
    },
    Load {
        owner: String,
        sink: ResultSink<Vec<PetData>>,
    },
    PlayerPets {
        owner: String,
        entity: Option<String>,
        sink: ResultSink<Vec<String>>,
    },
    Leaderboard {
        offset: usize,
        length: usize,
        entity: Option<String>,
        sink: ResultSink<Vec<PetData>>,
    },
    /// Stop taking work; in-flight reads still finish
    Shutdown,
}

impl Op {
    /// Drop the callback of an operation that was never queued.
    pub(crate) fn discard(self) {
        match self {
            Op::Toggle { sink, .. } => sink.discard(),
            Op::Load { sink, .. } | Op::Leaderboard { sink, .. } => sink.discard(),
            Op::PlayerPets { sink, .. } => sink.discard(),
            Op::Register(_) | Op::Unregister { .. } | Op::Rename { .. } | Op::Shutdown => {}
        }
    }
}

enum Next {
    Op(Op),
    ReadFinished(Result<(), tokio::task::JoinError>),
    Stop,
}

// =============================================================================
// Worker
// =============================================================================

/// Actor that owns the receiving end of the operation queue.
pub(crate) struct Worker {
    backend: Arc<dyn PetStorage>,
    rx: mpsc::UnboundedReceiver<Op>,
    errors: ErrorReporter,
    reads: JoinSet<()>,
}

impl Worker {
    pub(crate) fn new(
        backend: Arc<dyn PetStorage>,
        rx: mpsc::UnboundedReceiver<Op>,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            backend,
            rx,
            errors,
            reads: JoinSet::new(),
        }
    }

    /// Run until shutdown, then wait for in-flight reads.
    pub(crate) async fn run(mut self) {
        tracing::debug!(backend = self.backend.name(), "store worker running");
        loop {
            let next = tokio::select! {
                op = self.rx.recv() => match op {
                    Some(Op::Shutdown) | None => Next::Stop,
                    Some(op) => Next::Op(op),
                },
                Some(joined) = self.reads.join_next(), if !self.reads.is_empty() => {
                    Next::ReadFinished(joined)
                }
            };

            match next {
                Next::Op(op) => self.handle(op).await,
                Next::ReadFinished(joined) => self.reap(joined),
                Next::Stop => break,
            }
        }

        while let Some(joined) = self.reads.join_next().await {
            self.reap(joined);
        }
        tracing::debug!(backend = self.backend.name(), "store worker stopped");
    }

    fn reap(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            tracing::error!(error = %e, "read task failed");
        }
    }

    async fn handle(&mut self, op: Op) {
        let backend = Arc::clone(&self.backend);
        let errors = self.errors.clone();

        match op {
            Op::Register(data) => {
                if let Err(e) = backend.register_pet(&data).await {
                    errors.report("register_pet", Some(data.identity().to_string()), e);
                } else {
                    tracing::debug!(owner = %data.owner_name, pet = %data.pet_name, "registered pet");
                }
            }
            Op::Unregister { owner, pet } => {
                if let Err(e) = backend.unregister_pet(&owner, &pet).await {
                    errors.report("unregister_pet", Some(format!("{owner}/{pet}")), e);
                }
            }
            Op::Rename { owner, old, new } => {
                if let Err(e) = backend.update_pet_name(&owner, &old, &new).await {
                    errors.report("update_pet_name", Some(format!("{owner}/{old}")), e);
                } else {
                    tracing::debug!(%owner, %old, %new, "renamed pet");
                }
            }
            Op::Toggle { owner, pet, sink } => {
                // Completion signal: fires once the flip is applied, or failed
                let flipped = match backend.toggle_pets(&owner, pet.as_deref()).await {
                    Ok(flipped) => flipped,
                    Err(e) => {
                        let subject = match &pet {
                            Some(pet) => format!("{owner}/{pet}"),
                            None => owner.clone(),
                        };
                        errors.report("toggle_pets", Some(subject), e);
                        0
                    }
                };
                sink.deliver(flipped);
            }
            Op::Load { owner, sink } => {
                self.reads.spawn(async move {
                    let result = backend.load(&owner).await;
                    let pets = match result {
                        Ok(pets) => pets,
                        Err(e) => {
                            errors.report("load", Some(owner), e);
                            Vec::new()
                        }
                    };
                    sink.deliver(pets);
                });
            }
            Op::PlayerPets {
                owner,
                entity,
                sink,
            } => {
                self.reads.spawn(async move {
                    let result = backend.get_player_pets(&owner, entity.as_deref()).await;
                    let names = match result {
                        Ok(names) => names,
                        Err(e) => {
                            errors.report("get_player_pets", Some(owner), e);
                            Vec::new()
                        }
                    };
                    sink.deliver(names);
                });
            }
            Op::Leaderboard {
                offset,
                length,
                entity,
                sink,
            } => {
                self.reads.spawn(async move {
                    let page = match backend
                        .get_pets_leaderboard(offset, length, entity.as_deref())
                        .await
                    {
                        Ok(page) => page,
                        Err(e) => {
                            errors.report("get_pets_leaderboard", None, e);
                            Vec::new()
                        }
                    };
                    sink.deliver(page);
                });
            }
            // Never reaches here, the run loop stops on it
            Op::Shutdown => {}
        }
    }
}
