//! The process-wide map from operation identifier to operation object (spec
//! §2 "Operations registry").
//!
//! Per spec §9 "Global mutable state", this is a genuine singleton tied to
//! daemon lifetime, but it is never exposed as an ambient `static`: each
//! daemon instance constructs its own `OperationsRegistry` and passes it
//! down explicitly, so tests can run several independent daemons in one
//! process.
//!
//! Per spec §9 "Concurrent-membership of `Operations`", rendering (and the
//! terminal-state sweep) never iterates the map under a held lock: a
//! snapshot is an `Arc<HashMap<..>>` cloned out from behind a brief read
//! guard, then walked lock-free, so a concurrent `insert`/`remove` builds
//! and installs a fresh `Arc` rather than racing the iterator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_api_types::operation::{OperationClass, OperationStatus, RenderedOperation};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::event_bus::EventBus;
use crate::hooks::Hooks;
use crate::operation::{Operation, OperationError};

/// How long a terminal operation remains visible to `wait`/GET calls before
/// the sweep removes it (spec §4.1 "Cleanup").
pub const TERMINAL_GRACE_PERIOD: Duration = Duration::from_secs(5);

type Map = HashMap<Uuid, Arc<Operation>>;

/// The operations registry.
#[derive(Clone)]
pub struct OperationsRegistry {
    inner: Arc<RwLock<Arc<Map>>>,
    event_bus: EventBus,
}

impl OperationsRegistry {
    pub fn new(event_bus: EventBus) -> OperationsRegistry {
        OperationsRegistry {
            inner: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Creates and registers a new operation, and schedules its removal for
    /// `TERMINAL_GRACE_PERIOD` after it reaches a terminal state.
    pub fn create(
        &self,
        class: OperationClass,
        project: Option<String>,
        resources: std::collections::BTreeMap<String, Vec<String>>,
        metadata: serde_json::Value,
        hooks: Hooks,
    ) -> Result<Arc<Operation>, OperationError> {
        let op = Operation::create(class, project, resources, metadata, hooks, self.event_bus.clone())?;
        self.insert(Arc::clone(&op));
        self.schedule_sweep(Arc::clone(&op));
        Ok(op)
    }

    fn insert(&self, op: Arc<Operation>) {
        let mut guard = self.inner.write();
        let mut map = (**guard).clone();
        map.insert(op.id(), op);
        *guard = Arc::new(map);
    }

    fn remove(&self, id: Uuid) {
        let mut guard = self.inner.write();
        if guard.contains_key(&id) {
            let mut map = (**guard).clone();
            map.remove(&id);
            *guard = Arc::new(map);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Operation>> {
        self.inner.read().get(&id).cloned()
    }

    /// A lock-free, point-in-time view of every registered operation.
    pub fn snapshot(&self) -> Arc<Map> {
        self.inner.read().clone()
    }

    pub fn render_all(&self, project: Option<&str>) -> Vec<RenderedOperation> {
        self.snapshot()
            .values()
            .filter(|op| project.is_none() || op.render().project.as_deref() == project)
            .map(|op| op.render())
            .collect()
    }

    fn schedule_sweep(&self, op: Arc<Operation>) {
        let registry = self.clone();
        fleet_ore::task::spawn(
            move || format!("operation-sweep-{}", op.id()),
            async move {
                op.wait(None).await;
                tokio::time::sleep(TERMINAL_GRACE_PERIOD).await;
                registry.remove(op.id());
                tracing::debug!(operation_id = %op.id(), "swept terminal operation from registry");
            },
        );
    }

    /// Cancels every local token-class operation whose metadata has expired,
    /// used by the pending-identity sweep (spec §4.5).
    pub fn cancel_expired_tokens<F>(&self, is_expired: F) -> Vec<Uuid>
    where
        F: Fn(&RenderedOperation) -> bool,
    {
        let mut cancelled = vec![];
        for op in self.snapshot().values() {
            if op.class() != OperationClass::Token {
                continue;
            }
            if op.status() != OperationStatus::Running {
                continue;
            }
            let rendered = op.render();
            if is_expired(&rendered) {
                cancelled.push(op.id());
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn terminal_operation_is_swept_after_grace_period() {
        let registry = OperationsRegistry::new(EventBus::new());
        let op = registry
            .create(
                OperationClass::Task,
                None,
                BTreeMap::new(),
                serde_json::Value::Null,
                Hooks::task(Box::new(|_token| Box::pin(async { Ok(serde_json::Value::Null) }))),
            )
            .unwrap();
        let id = op.id();
        op.start().unwrap();
        op.wait(None).await;
        // Still visible during the grace window.
        assert!(registry.get(id).is_some());
        tokio::time::sleep(TERMINAL_GRACE_PERIOD + StdDuration::from_millis(200)).await;
        assert!(registry.get(id).is_none());
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_concurrent_insert() {
        let registry = OperationsRegistry::new(EventBus::new());
        let snapshot_before = registry.snapshot();
        registry
            .create(
                OperationClass::Token,
                None,
                BTreeMap::new(),
                serde_json::Value::Null,
                Hooks::token(),
            )
            .unwrap();
        assert_eq!(snapshot_before.len(), 0);
        assert_eq!(registry.snapshot().len(), 1);
    }
}
