//! Bean lifecycle events and observers.
//!
//! Every mutation of a [`Context`] is announced as a [`LifecycleEvent`].
//! Observers are called synchronously, in registration order, before the
//! mutating call returns. The first observer error stops delivery and is
//! handed back to the caller that triggered the mutation.
//!
//! Observers receive the context itself and may mutate it. Events raised
//! that way are queued and delivered after the current round finishes, and
//! observers registered or unregistered mid-delivery take effect at the end
//! of that round.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use trellis_types::{Identifier, ObserverError, SourceInfo, TrellisError};

use crate::context::{Context, ContextId};
use crate::Value;

/// What happened to a bean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Add,
    Change,
    Remove,
    EnterScope,
    LeaveScope,
}

impl LifecycleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleKind::Add => "add",
            LifecycleKind::Change => "change",
            LifecycleKind::Remove => "remove",
            LifecycleKind::EnterScope => "enter_scope",
            LifecycleKind::LeaveScope => "leave_scope",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle notification.
#[derive(Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub identifier: Identifier,
    /// The value involved: the new value for add/change, the previous value
    /// for remove, the current value (if any) for scope transitions.
    pub value: Option<Value>,
    pub source: Option<SourceInfo>,
    /// The context the event originated in.
    pub context: ContextId,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleKind,
        identifier: Identifier,
        value: Option<Value>,
        source: Option<SourceInfo>,
        context: ContextId,
    ) -> Self {
        Self {
            kind,
            identifier,
            value,
            source,
            context,
        }
    }

    /// The event's value downcast to `T`.
    pub fn value_as<T: Any>(&self) -> Option<&T> {
        self.value.as_ref()?.as_ref().downcast_ref::<T>()
    }
}

impl fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("has_value", &self.value.is_some())
            .field("source", &self.source)
            .field("context", &self.context)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// What an observer callback returns.
pub type ObserverResult = std::result::Result<(), ObserverError>;

pub trait LifecycleObserver: Send + Sync {
    /// Called for each event of the context the observer is registered on.
    /// `context` is that context; mutations made through it are announced
    /// once the current delivery round completes.
    fn on_event(&self, event: &LifecycleEvent, context: &mut Context) -> ObserverResult;
}

impl<F> LifecycleObserver for F
where
    F: Fn(&LifecycleEvent, &mut Context) -> ObserverResult + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent, context: &mut Context) -> ObserverResult {
        self(event, context)
    }
}

/// Handle returned by observer registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

enum PendingChange {
    Add(ObserverId, Arc<dyn LifecycleObserver>),
    Remove(ObserverId),
}

/// Ordered observer list owned by one context.
///
/// While a delivery is running the list is frozen: registrations and
/// removals are parked in `pending` and applied by [`sync`](Self::sync).
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: u64,
    entries: Vec<(ObserverId, Arc<dyn LifecycleObserver>)>,
    pending: Vec<PendingChange>,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Arc<dyn LifecycleObserver>, defer: bool) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        if defer {
            self.pending.push(PendingChange::Add(id, observer));
        } else {
            self.entries.push((id, observer));
        }
        id
    }

    pub(crate) fn remove(
        &mut self,
        id: ObserverId,
        defer: bool,
    ) -> Option<Arc<dyn LifecycleObserver>> {
        if !defer {
            let pos = self.entries.iter().position(|(oid, _)| *oid == id)?;
            return Some(self.entries.remove(pos).1);
        }

        // Registered during this delivery and never active: drop it outright.
        let queued = self
            .pending
            .iter()
            .position(|c| matches!(c, PendingChange::Add(pid, _) if *pid == id));
        if let Some(pos) = queued {
            return match self.pending.remove(pos) {
                PendingChange::Add(_, observer) => Some(observer),
                PendingChange::Remove(_) => None,
            };
        }

        if self
            .pending
            .iter()
            .any(|c| matches!(c, PendingChange::Remove(pid) if *pid == id))
        {
            return None;
        }
        let observer = self
            .entries
            .iter()
            .find(|(oid, _)| *oid == id)
            .map(|(_, o)| Arc::clone(o))?;
        self.pending.push(PendingChange::Remove(id));
        Some(observer)
    }

    /// Apply registrations and removals parked during delivery, in the order
    /// they were made.
    pub(crate) fn sync(&mut self) {
        for change in std::mem::take(&mut self.pending) {
            match change {
                PendingChange::Add(id, observer) => self.entries.push((id, observer)),
                PendingChange::Remove(id) => self.entries.retain(|(oid, _)| *oid != id),
            }
        }
    }

    /// Number of active observers. Parked registrations are not counted.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn handles(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.entries.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    /// The active observers for one delivery round.
    pub(crate) fn snapshot(&self) -> Vec<(ObserverId, Arc<dyn LifecycleObserver>)> {
        self.entries
            .iter()
            .map(|(id, o)| (*id, Arc::clone(o)))
            .collect()
    }

    /// A copy of the active observers with nothing parked, for a forked
    /// context.
    pub(crate) fn detached(&self) -> Self {
        Self {
            next_id: self.next_id,
            entries: self.snapshot(),
            pending: Vec::new(),
        }
    }
}

/// Wrap an observer failure for the caller of the mutating operation.
pub(crate) fn observer_failed(
    id: ObserverId,
    event: &LifecycleEvent,
    source: ObserverError,
) -> TrellisError {
    tracing::warn!(
        observer = ?id,
        event = %event.kind,
        bean = %event.identifier,
        error = %source,
        "Lifecycle observer failed"
    );
    TrellisError::Observer {
        event: event.kind.to_string(),
        name: event.identifier.name().to_string(),
        source,
    }
}

// ---------------------------------------------------------------------------
// EventRecorder
// ---------------------------------------------------------------------------

/// Observer that keeps every event it sees. Useful for diagnostics and tests.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// `(kind, bean name)` pairs in delivery order.
    pub fn kinds(&self) -> Vec<(LifecycleKind, String)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.kind, e.identifier.name().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LifecycleObserver for EventRecorder {
    fn on_event(&self, event: &LifecycleEvent, _context: &mut Context) -> ObserverResult {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
