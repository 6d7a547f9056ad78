//! Change-listener registry.

use crate::model::Component;
use crate::record::CommitRecord;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Notified after uncommitted writes and after commits.
///
/// A failing callback is logged and does not stop delivery to the other
/// listeners.
pub trait ChangeListener: Send + Sync {
    fn listener_uuid(&self) -> Uuid;

    fn handle_change(&self, _component: &Component) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle_commit(&self, record: &CommitRecord) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<Uuid, Arc<dyn ChangeListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any listener registered under the same UUID.
    pub fn add(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.insert(listener.listener_uuid(), listener);
    }

    pub fn remove(&self, listener_uuid: Uuid) -> bool {
        self.listeners.remove(&listener_uuid).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    // Callbacks run on a snapshot so a listener may (de)register others.
    fn snapshot(&self) -> Vec<(Uuid, Arc<dyn ChangeListener>)> {
        self.listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn notify_change(&self, component: &Component) {
        for (uuid, listener) in self.snapshot() {
            if let Err(err) = listener.handle_change(component) {
                error!(listener = %uuid, nid = component.nid(), error = %err, "change listener failed");
            }
        }
    }

    pub fn notify_commit(&self, record: &CommitRecord) {
        for (uuid, listener) in self.snapshot() {
            if let Err(err) = listener.handle_commit(record) {
                error!(listener = %uuid, error = %err, "commit listener failed");
            }
        }
    }
}
