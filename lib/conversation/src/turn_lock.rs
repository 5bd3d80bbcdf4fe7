//! Per-conversation turn serialization.
//!
//! At most one turn per conversation is in flight. A `TurnGuard` is taken
//! before state is loaded and dropped after state is saved; dropping it on any
//! path, including `?` and panics, releases the conversation. Different
//! conversations never contend for the same lock.

use crate::reference::ConversationKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type LockTable = Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>;

/// Registry of per-conversation locks.
#[derive(Debug, Clone, Default)]
pub struct TurnLocks {
    table: Arc<LockTable>,
}

impl TurnLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other turn holds `key`, then holds it.
    pub async fn acquire(&self, key: &ConversationKey) -> TurnGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_default())
        };

        let guard = lock.lock_owned().await;
        trace!(conversation = %key, "turn lock acquired");

        TurnGuard {
            key: key.clone(),
            table: Arc::clone(&self.table),
            _guard: guard,
        }
    }

    /// Returns the number of conversations with a held or awaited lock.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive hold on a conversation for the duration of a turn.
#[derive(Debug)]
pub struct TurnGuard {
    key: ConversationKey,
    table: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

impl TurnGuard {
    /// Returns the conversation this guard holds.
    #[must_use]
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // The table and this guard hold the only references: nobody is waiting.
        if table
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            table.remove(&self.key);
        }
        trace!(conversation = %self.key, "turn lock released");
    }
}
