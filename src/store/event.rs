//! Error side channel.
//!
//! Write-path failures never reach the caller inline. They are logged and
//! broadcast as [`StoreEvent`]s to whoever subscribed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::storage::StorageError;

/// Capacity of the error broadcast; slow subscribers lose the oldest events
pub const ERROR_CHANNEL_CAPACITY: usize = 256;

/// A failure that happened off the caller's path.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Operation that failed, e.g. `register_pet`
    pub op: &'static str,
    /// What it was operating on, e.g. `steve/rex`
    pub subject: Option<String>,
    /// The failure
    pub error: Arc<StorageError>,
    /// When it was reported
    pub at: DateTime<Utc>,
}

/// Sending half of the side channel.
#[derive(Debug, Clone)]
pub(crate) struct ErrorReporter {
    tx: broadcast::Sender<StoreEvent>,
}

impl ErrorReporter {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn report(&self, op: &'static str, subject: Option<String>, error: StorageError) {
        tracing::error!(op, subject = subject.as_deref().unwrap_or("-"), error = %error, "pet storage operation failed");
        let event = StoreEvent {
            op,
            subject,
            error: Arc::new(error),
            at: Utc::now(),
        };
        // No subscribers is fine, the log line above still records it
        let _ = self.tx.send(event);
    }
}
