use crate::normalize::normalize_record;
use async_trait::async_trait;
use resonance_core::{ConversationState, StatePatch, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-user state persistence port.
///
/// `get` returns the canonical state (legacy spellings already mapped) or
/// `None` when nothing is stored. `upsert` merges the patch into whatever is
/// stored under tri-state semantics and returns the merged state; it is the
/// only write a turn performs.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError>;

    async fn upsert(
        &self,
        user_id: &str,
        patch: &StatePatch,
    ) -> Result<ConversationState, StoreError>;
}

/// Merge a patch onto a stored record, producing the record to write back.
pub(crate) fn merge_record(
    existing: Option<&Value>,
    patch: &StatePatch,
) -> Result<(ConversationState, Value), StoreError> {
    let mut state = existing
        .map(normalize_record)
        .unwrap_or_else(ConversationState::first_turn);
    state.apply_patch(patch.clone());
    let record = serde_json::to_value(&state)?;
    Ok((state, record))
}

/// Process-local store. Keeps raw JSON records so that legacy shapes seeded
/// for tests or migrations go through the same normalization as SQLite rows.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<String, Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw record, in whatever shape an older writer produced.
    pub async fn insert_raw(&self, user_id: impl Into<String>, record: Value) {
        self.records.write().await.insert(user_id.into(), record);
    }

    /// Raw record as last written.
    pub async fn raw(&self, user_id: &str) -> Option<Value> {
        self.records.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.records.read().await.get(user_id).map(normalize_record))
    }

    async fn upsert(
        &self,
        user_id: &str,
        patch: &StatePatch,
    ) -> Result<ConversationState, StoreError> {
        // Hold the write lock across read-merge-write so concurrent turns for
        // the same user never interleave.
        let mut records = self.records.write().await;
        let (state, record) = merge_record(records.get(user_id), patch)?;
        records.insert(user_id.to_string(), record);
        tracing::debug!("State upserted for {}", user_id);
        Ok(state)
    }
}
