//! Change notifications emitted by the cache engine.
//!
//! Notifications are emitted after a dispatched event's state has been
//! published. They describe what changed between the previous and the new
//! snapshot; the sink decides what they mean (re-render a view, log, ignore).
//! Restoring a cache from a saved state emits nothing.

use parking_lot::Mutex;

use crate::types::{CollectionPath, Via};

/// A change observed between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// The merged view of a collection changed.
    CollectionChanged { collection: CollectionPath },
    /// A query entry was created or changed.
    QueryUpdated { alias: String, via: Via },
    /// A query entry was removed.
    QueryRemoved { alias: String },
}

/// A sink that receives change notifications.
pub trait SideEffectSink: Send + Sync {
    /// Emit a side-effect.
    ///
    /// Called after the new snapshot is visible to readers.
    fn emit(&self, effect: SideEffect);
}

/// A no-op sink that discards all side-effects.
#[derive(Debug, Default)]
pub struct NullSink;

impl SideEffectSink for NullSink {
    fn emit(&self, _effect: SideEffect) {}
}

/// Keeps every notification in emission order.
///
/// Used by tests and by tools that inspect what a sequence of events did to
/// the published queries.
#[derive(Debug, Default)]
pub struct RecordingSink {
    effects: Mutex<Vec<SideEffect>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects.lock().clone()
    }

    /// Drains the recorded effects.
    pub fn take(&self) -> Vec<SideEffect> {
        std::mem::take(&mut *self.effects.lock())
    }

    pub fn clear(&self) {
        self.effects.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.effects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.lock().is_empty()
    }

    /// Provenance of each update published for `alias`, oldest first.
    pub fn updates_for(&self, alias: &str) -> Vec<Via> {
        self.effects
            .lock()
            .iter()
            .filter_map(|effect| match effect {
                SideEffect::QueryUpdated { alias: a, via } if a == alias => Some(*via),
                _ => None,
            })
            .collect()
    }

    /// Collections whose merged view changed, deduplicated.
    pub fn changed_collections(&self) -> Vec<CollectionPath> {
        let mut seen: Vec<CollectionPath> = Vec::new();
        for effect in self.effects.lock().iter() {
            if let SideEffect::CollectionChanged { collection } = effect {
                if !seen.contains(collection) {
                    seen.push(collection.clone());
                }
            }
        }
        seen
    }
}

impl SideEffectSink for RecordingSink {
    fn emit(&self, effect: SideEffect) {
        self.effects.lock().push(effect);
    }
}
