use std::sync::Arc;

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;

use crate::state::{EntityState, EntitySummary};
use crate::types::{Snapshot, WarmupProgress};

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// token_id → EntityState. Entries are created lazily on first observation and
/// only ever removed when their whole event has closed.
pub struct StateStore {
    entities: DashMap<String, EntityState>,
}

impl StateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Locked handle on the entity for `snapshot`, creating it if needed.
    /// Holding the guard is what makes record + detect one unit per entity.
    pub fn entry_for(&self, snapshot: &Snapshot) -> RefMut<'_, String, EntityState> {
        self.entities
            .entry(snapshot.token_id.clone())
            .or_insert_with(|| EntityState::new(snapshot))
    }

    pub fn get(&self, token_id: &str) -> Option<Ref<'_, String, EntityState>> {
        self.entities.get(token_id)
    }

    pub fn contains(&self, token_id: &str) -> bool {
        self.entities.contains_key(token_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drops every entity belonging to `event_id`. Returns how many were removed;
    /// 0 for an event that is already gone.
    pub fn remove_event(&self, event_id: &str) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, state| state.event_id != event_id);
        before.saturating_sub(self.entities.len())
    }

    pub fn token_ids_for_event(&self, event_id: &str) -> Vec<String> {
        self.entities
            .iter()
            .filter(|e| e.value().event_id == event_id)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Entities whose windows have all passed warm-up, over all tracked entities.
    pub fn warmup_progress(&self, min_observations: usize) -> WarmupProgress {
        let total = self.entities.len();
        let ready = self
            .entities
            .iter()
            .filter(|e| e.value().is_warm(min_observations))
            .count();
        WarmupProgress { ready, total }
    }

    /// Per-entity window statistics, sorted by token id.
    pub fn summaries(&self, min_observations: usize) -> Vec<EntitySummary> {
        let mut out: Vec<EntitySummary> = self
            .entities
            .iter()
            .map(|e| e.value().summary(min_observations))
            .collect();
        out.sort_by(|a, b| a.token_id.cmp(&b.token_id));
        out
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            entities: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
