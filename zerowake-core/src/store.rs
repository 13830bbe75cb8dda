//! Desired-state store.
//!
//! Thread-safe map of declared FunctionSpecs using DashMap. Every mutation is
//! published on a broadcast channel so the reconciler can react to it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ZeroWakeError, ZeroWakeResult};
use crate::spec::FunctionSpec;
use crate::types::FunctionId;

const EVENT_CAPACITY: usize = 1024;

/// Reconciliation phase reported per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
}

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        }
    }
}

/// Status condition written by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub phase: Phase,
    pub observed_generation: Option<u64>,
    pub last_error: Option<String>,
    /// Unix millis of the last reconcile attempt.
    pub last_reconciled_ms: Option<u64>,
}

impl Condition {
    pub fn pending() -> Self {
        Self {
            phase: Phase::Pending,
            observed_generation: None,
            last_error: None,
            last_reconciled_ms: None,
        }
    }

    pub fn ready(generation: u64) -> Self {
        Self {
            phase: Phase::Ready,
            observed_generation: Some(generation),
            last_error: None,
            last_reconciled_ms: Some(unix_millis()),
        }
    }

    pub fn failed(generation: u64, error: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            observed_generation: Some(generation),
            last_error: Some(error.into()),
            last_reconciled_ms: Some(unix_millis()),
        }
    }
}

/// Entry in the store.
#[derive(Debug, Clone)]
pub struct StoredFunction {
    pub spec: FunctionSpec,
    /// Bumped on every change of the spec, starting at 1.
    pub generation: u64,
    pub condition: Condition,
}

/// Change notification published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecEvent {
    Applied { id: FunctionId, generation: u64 },
    Deleted { id: FunctionId },
}

impl SpecEvent {
    pub fn function_id(&self) -> &FunctionId {
        match self {
            Self::Applied { id, .. } | Self::Deleted { id } => id,
        }
    }
}

/// Concurrent desired-state store.
#[derive(Debug)]
pub struct DesiredStateStore {
    functions: DashMap<FunctionId, StoredFunction>,
    events: broadcast::Sender<SpecEvent>,
}

impl DesiredStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            functions: DashMap::new(),
            events,
        }
    }

    /// Create a store wrapped in an Arc for sharing across tasks.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Receive every subsequent spec change.
    pub fn subscribe(&self) -> broadcast::Receiver<SpecEvent> {
        self.events.subscribe()
    }

    /// Create or update a function. Returns its generation.
    /// Re-applying an identical spec is a no-op and publishes nothing.
    pub fn apply(&self, spec: FunctionSpec) -> u64 {
        let id = spec.id.clone();
        let generation = {
            let mut entry = self
                .functions
                .entry(id.clone())
                .or_insert_with(|| StoredFunction {
                    spec: spec.clone(),
                    generation: 0,
                    condition: Condition::pending(),
                });

            if entry.generation > 0 && entry.spec == spec {
                return entry.generation;
            }
            entry.spec = spec;
            entry.generation += 1;
            entry.condition.phase = Phase::Pending;
            entry.generation
        };

        tracing::info!(function_id = %id, generation, "Applied function spec");
        let _ = self.events.send(SpecEvent::Applied { id, generation });
        generation
    }

    /// Remove a function. Returns false if it was not present.
    pub fn delete(&self, id: &FunctionId) -> bool {
        if self.functions.remove(id).is_none() {
            return false;
        }
        tracing::info!(function_id = %id, "Deleted function spec");
        let _ = self.events.send(SpecEvent::Deleted { id: id.clone() });
        true
    }

    pub fn get(&self, id: &FunctionId) -> Option<StoredFunction> {
        self.functions.get(id).map(|entry| entry.clone())
    }

    /// Get the spec for a function.
    pub fn spec(&self, id: &FunctionId) -> ZeroWakeResult<FunctionSpec> {
        self.functions
            .get(id)
            .map(|entry| entry.spec.clone())
            .ok_or_else(|| ZeroWakeError::FunctionNotFound(id.clone()))
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.functions.contains_key(id)
    }

    /// Get a sorted list of all function IDs.
    pub fn ids(&self) -> Vec<FunctionId> {
        let mut ids: Vec<_> = self.functions.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Record a reconcile outcome. Ignored if the function was deleted meanwhile.
    pub fn record_condition(&self, id: &FunctionId, condition: Condition) {
        if let Some(mut entry) = self.functions.get_mut(id) {
            entry.condition = condition;
        }
    }

    pub fn condition(&self, id: &FunctionId) -> Option<Condition> {
        self.functions.get(id).map(|entry| entry.condition.clone())
    }
}

impl Default for DesiredStateStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, code: &str) -> FunctionSpec {
        FunctionSpec::builder(name)
            .code(code)
            .runtime("python3.9")
            .replicas(0, 2)
            .build()
            .unwrap()
    }

    #[test]
    fn test_apply_and_get() {
        let store = DesiredStateStore::new();
        assert_eq!(store.apply(spec("hello", "a")), 1);

        let id = FunctionId::new("hello").unwrap();
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).unwrap().condition.phase, Phase::Pending);
        assert_eq!(store.spec(&id).unwrap().code, "a");
    }

    #[test]
    fn test_identical_apply_keeps_generation() {
        let store = DesiredStateStore::new();
        let mut events = store.subscribe();

        assert_eq!(store.apply(spec("hello", "a")), 1);
        assert_eq!(store.apply(spec("hello", "a")), 1);
        assert_eq!(store.apply(spec("hello", "b")), 2);

        assert!(matches!(
            events.try_recv().unwrap(),
            SpecEvent::Applied { generation: 1, .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            SpecEvent::Applied { generation: 2, .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_delete() {
        let store = DesiredStateStore::new();
        let mut events = store.subscribe();
        let id = FunctionId::new("hello").unwrap();

        store.apply(spec("hello", "a"));
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.is_empty());
        assert!(matches!(store.spec(&id), Err(ZeroWakeError::FunctionNotFound(_))));

        let _ = events.try_recv();
        assert_eq!(events.try_recv().unwrap(), SpecEvent::Deleted { id });
    }

    #[test]
    fn test_record_condition() {
        let store = DesiredStateStore::new();
        let id = FunctionId::new("hello").unwrap();
        store.apply(spec("hello", "a"));

        store.record_condition(&id, Condition::failed(1, "quota exceeded"));
        let condition = store.condition(&id).unwrap();
        assert_eq!(condition.phase, Phase::Failed);
        assert_eq!(condition.last_error.as_deref(), Some("quota exceeded"));
        assert!(condition.last_reconciled_ms.is_some());

        store.record_condition(&id, Condition::ready(1));
        assert_eq!(store.condition(&id).unwrap().phase, Phase::Ready);
    }

    #[test]
    fn test_condition_for_deleted_function_is_dropped() {
        let store = DesiredStateStore::new();
        let id = FunctionId::new("ghost").unwrap();
        store.record_condition(&id, Condition::ready(1));
        assert!(store.condition(&id).is_none());
    }

    #[test]
    fn test_ids_sorted() {
        let store = DesiredStateStore::new();
        store.apply(spec("zeta", "a"));
        store.apply(spec("alpha", "a"));
        let ids: Vec<_> = store.ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
