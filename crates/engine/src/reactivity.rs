use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use recgraph_core::ids::*;

/// Something an observer can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    Field(RecordRef, FieldIndex),
    /// Creation and deletion of records of a type.
    Type(Arc<str>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Field { record: RecordRef, field: Arc<str> },
    Created { record: RecordRef, type_name: Arc<str> },
    Deleted { record: RecordRef, type_name: Arc<str> },
}

/// Changes relevant to one observer, delivered once per settled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub observer: ObserverId,
    pub changes: Vec<Change>,
}

pub type ObserverFn = Box<dyn FnMut(&Notification)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame {
    Observe(ObserverId),
    Compute,
}

struct Observer {
    callback: ObserverFn,
    watches: HashSet<WatchKey>,
}

/// Observer registry plus the stack of active read contexts.
///
/// Only a read made while an `Observe` frame is on top is recorded; the
/// scheduler pushes a `Compute` frame around recomputation so its reads stay
/// invisible.
#[derive(Default)]
pub(crate) struct Reactivity {
    next_observer: u64,
    observers: IndexMap<ObserverId, Observer>,
    subscribers: HashMap<WatchKey, BTreeSet<ObserverId>>,
    frames: Vec<Frame>,
}

impl Reactivity {
    pub fn subscribe(&mut self, callback: ObserverFn) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId::from_raw(self.next_observer);
        self.observers.insert(
            id,
            Observer {
                callback,
                watches: HashSet::new(),
            },
        );
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let Some(observer) = self.observers.shift_remove(&id) else {
            return false;
        };
        for key in observer.watches {
            self.drop_subscriber(&key, id);
        }
        true
    }

    pub fn is_subscribed(&self, id: ObserverId) -> bool {
        self.observers.contains_key(&id)
    }

    /// Forget every dependency of `id`.
    pub fn reset(&mut self, id: ObserverId) {
        let Some(observer) = self.observers.get_mut(&id) else {
            return;
        };
        let watches: Vec<WatchKey> = observer.watches.drain().collect();
        for key in watches {
            self.drop_subscriber(&key, id);
        }
    }

    pub fn watch(&mut self, id: ObserverId, key: WatchKey) {
        let Some(observer) = self.observers.get_mut(&id) else {
            return;
        };
        if observer.watches.insert(key.clone()) {
            self.subscribers.entry(key).or_default().insert(id);
        }
    }

    /// Record a read against the observer on top of the frame stack.
    pub fn observe(&mut self, key: WatchKey) {
        if let Some(Frame::Observe(id)) = self.frames.last().copied() {
            self.watch(id, key);
        }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Drop all field watches on a deleted record.
    pub fn forget_record(&mut self, record: RecordRef) {
        let keys: Vec<WatchKey> = self
            .subscribers
            .keys()
            .filter(|key| matches!(key, WatchKey::Field(r, _) if *r == record))
            .cloned()
            .collect();
        for key in keys {
            if let Some(ids) = self.subscribers.remove(&key) {
                for id in ids {
                    if let Some(observer) = self.observers.get_mut(&id) {
                        observer.watches.remove(&key);
                    }
                }
            }
        }
    }

    /// Deliver `changes` to every observer watching at least one of them.
    pub fn dispatch(&mut self, changes: &[(WatchKey, Change)]) {
        let mut pending: IndexMap<ObserverId, Vec<Change>> = IndexMap::new();
        for (key, change) in changes {
            let Some(ids) = self.subscribers.get(key) else {
                continue;
            };
            for id in ids {
                pending.entry(*id).or_default().push(change.clone());
            }
        }
        pending.sort_keys();
        for (id, changes) in pending {
            if let Some(observer) = self.observers.get_mut(&id) {
                (observer.callback)(&Notification {
                    observer: id,
                    changes,
                });
            }
        }
    }

    fn drop_subscriber(&mut self, key: &WatchKey, id: ObserverId) {
        if let Some(ids) = self.subscribers.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.subscribers.remove(key);
            }
        }
    }
}
