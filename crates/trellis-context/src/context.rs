//! The scoped bean store for one processing pass.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use trellis_types::{Identifier, IdentifierRegistry, Result, SourceInfo, TrellisError};

use crate::events::{
    observer_failed, LifecycleEvent, LifecycleKind, LifecycleObserver, ObserverId, ObserverList,
};
use crate::live_view::LiveView;
use crate::Value;

/// Unique id of a context instance, carried on every event it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A bean addressed either by identifier (fast path) or by name.
#[derive(Debug, Clone)]
pub enum BeanKey {
    Id(Identifier),
    Name(String),
}

impl From<Identifier> for BeanKey {
    fn from(id: Identifier) -> Self {
        BeanKey::Id(id)
    }
}

impl From<&Identifier> for BeanKey {
    fn from(id: &Identifier) -> Self {
        BeanKey::Id(id.clone())
    }
}

impl From<&str> for BeanKey {
    fn from(name: &str) -> Self {
        BeanKey::Name(name.to_string())
    }
}

impl From<String> for BeanKey {
    fn from(name: String) -> Self {
        BeanKey::Name(name)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Slot state. `Deleted` is distinct from `Unset` so the live view can report
/// removed beans as explicit nulls.
#[derive(Clone, Default)]
pub(crate) enum Slot {
    #[default]
    Unset,
    Present(Value),
    Deleted,
}

#[derive(Clone)]
pub(crate) struct ContextEntry {
    pub(crate) slot: Slot,
    in_scope: bool,
    /// Indices of entries whose lifetime is tied to this one.
    associations: Vec<usize>,
}

impl Default for ContextEntry {
    fn default() -> Self {
        Self {
            slot: Slot::Unset,
            in_scope: true,
            associations: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Named-object store for a single processing pass.
///
/// Not shared between threads: one pass drives its context from the first
/// element visited to the last. Only the [`IdentifierRegistry`] is shared.
pub struct Context {
    id: ContextId,
    parent: Option<ContextId>,
    owner: Option<String>,
    registry: Arc<IdentifierRegistry>,
    entries: Vec<ContextEntry>,
    observers: ObserverList,
    /// Set while observers are being called.
    delivering: bool,
    /// Events raised by observers, waiting for the current round to end.
    queued: VecDeque<LifecycleEvent>,
}

impl Context {
    /// Create an empty root context over `registry`.
    pub fn new(registry: Arc<IdentifierRegistry>) -> Self {
        let capacity = registry.len();
        Self {
            id: ContextId::new(),
            parent: None,
            owner: None,
            registry,
            entries: Vec::with_capacity(capacity),
            observers: ObserverList::default(),
            delivering: false,
            queued: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Id of the context this one was forked from.
    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent
    }

    /// Label of the component that forked this context.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn registry(&self) -> &Arc<IdentifierRegistry> {
        &self.registry
    }

    /// Identifier for `name`, registering it if needed.
    pub fn identifier(&self, name: &str) -> Identifier {
        self.registry.get_or_register(name)
    }

    fn resolve(&self, key: BeanKey) -> Identifier {
        match key {
            BeanKey::Id(id) => id,
            BeanKey::Name(name) => self.registry.get_or_register(&name),
        }
    }

    fn entry(&self, index: usize) -> Option<&ContextEntry> {
        self.entries.get(index)
    }

    /// Entry for `id`, growing the store if the identifier was allocated
    /// after this context was created.
    fn entry_mut(&mut self, id: &Identifier) -> Result<&mut ContextEntry> {
        let index = id.index();
        if index >= self.entries.len() {
            if index >= self.registry.len() {
                return Err(TrellisError::UnknownIdentifier { index });
            }
            self.entries.resize_with(index + 1, ContextEntry::default);
        }
        Ok(&mut self.entries[index])
    }

    fn emit(
        &mut self,
        kind: LifecycleKind,
        identifier: Identifier,
        value: Option<Value>,
        source: Option<&SourceInfo>,
    ) -> Result<()> {
        let event = LifecycleEvent::new(kind, identifier, value, source.cloned(), self.id);
        self.notify(event)
    }

    // --- Mutation ---

    /// Store `value` under `key`, overwriting any previous value.
    ///
    /// Beans associated with the entry are cleaned first when the entry is
    /// out of scope. Emits one `Add` event.
    pub fn add(
        &mut self,
        key: impl Into<BeanKey>,
        value: Value,
        source: Option<&SourceInfo>,
    ) -> Result<()> {
        let id = self.resolve(key.into());
        self.entry_mut(&id)?;
        self.clean(id.index());
        self.entries[id.index()].slot = Slot::Present(Arc::clone(&value));

        tracing::trace!(context = %self.id, bean = %id, "Bean added");
        self.emit(LifecycleKind::Add, id, Some(value), source)
    }

    /// Replace the value of a bean that must already be present.
    ///
    /// Unlike [`add`](Self::add), associated beans are left untouched.
    /// Emits `Change`.
    pub fn change(
        &mut self,
        id: &Identifier,
        value: Value,
        source: Option<&SourceInfo>,
    ) -> Result<()> {
        match self.entries.get_mut(id.index()) {
            Some(entry) if matches!(entry.slot, Slot::Present(_)) => {
                entry.slot = Slot::Present(Arc::clone(&value));
            }
            _ => {
                return Err(TrellisError::BeanNotPresent {
                    name: id.name().to_string(),
                })
            }
        }

        tracing::trace!(context = %self.id, bean = %id, "Bean changed");
        self.emit(LifecycleKind::Change, id.clone(), Some(value), source)
    }

    /// Remove a bean, leaving a deleted marker in its slot.
    ///
    /// Associated beans are cleaned first when the entry is out of scope,
    /// as in [`add`](Self::add). Returns the previous value. Removing a bean that is not present is a
    /// no-op that returns `None` and emits nothing; otherwise a `Remove`
    /// event carrying the previous value is emitted.
    pub fn remove(
        &mut self,
        key: impl Into<BeanKey>,
        source: Option<&SourceInfo>,
    ) -> Result<Option<Value>> {
        let id = match key.into() {
            BeanKey::Id(id) => id,
            BeanKey::Name(name) => match self.registry.get(&name) {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        if !matches!(self.slot(id.index()), Some(Slot::Present(_))) {
            return Ok(None);
        }
        self.clean(id.index());

        let slot = std::mem::replace(&mut self.entries[id.index()].slot, Slot::Deleted);
        let Slot::Present(previous) = slot else {
            return Ok(None);
        };

        tracing::trace!(context = %self.id, bean = %id, "Bean removed");
        self.emit(LifecycleKind::Remove, id, Some(Arc::clone(&previous)), source)?;
        Ok(Some(previous))
    }

    /// Mark every present bean deleted. Bulk reset: no events are emitted.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            if matches!(entry.slot, Slot::Present(_)) {
                entry.slot = Slot::Deleted;
            }
            entry.in_scope = true;
            entry.associations.clear();
        }
        tracing::trace!(context = %self.id, "Context cleared");
    }

    /// Mark whether the fragment that defines `id` is still being visited.
    ///
    /// Emits `EnterScope` or `LeaveScope` when the flag actually changes.
    pub fn set_in_scope(
        &mut self,
        id: &Identifier,
        in_scope: bool,
        source: Option<&SourceInfo>,
    ) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if entry.in_scope == in_scope {
            return Ok(());
        }
        entry.in_scope = in_scope;
        let value = match &entry.slot {
            Slot::Present(v) => Some(Arc::clone(v)),
            _ => None,
        };

        let kind = if in_scope {
            LifecycleKind::EnterScope
        } else {
            LifecycleKind::LeaveScope
        };
        self.emit(kind, id.clone(), value, source)
    }

    /// Whether `id`'s fragment is still being visited. Beans start in scope.
    pub fn is_in_scope(&self, id: &Identifier) -> bool {
        self.entry(id.index()).map_or(true, |e| e.in_scope)
    }

    /// Tie `child`'s lifetime to `parent`: when `parent` is overwritten or
    /// removed while out of scope, `child` (and its own associations) are
    /// deleted.
    pub fn associate(&mut self, parent: &Identifier, child: &Identifier) -> Result<()> {
        self.entry_mut(child)?;
        let entry = self.entry_mut(parent)?;
        if !entry.associations.contains(&child.index()) {
            entry.associations.push(child.index());
        }
        Ok(())
    }

    /// Delete the beans associated with `root`, transitively. Entries still
    /// in scope are skipped along with everything below them.
    fn clean(&mut self, root: usize) {
        let Some(entry) = self.entries.get_mut(root) else {
            return;
        };
        if entry.in_scope || entry.associations.is_empty() {
            return;
        }

        let mut visited = HashSet::from([root]);
        let mut pending = entry.associations.clone();
        while let Some(index) = pending.pop() {
            if !visited.insert(index) {
                continue;
            }
            let Some(child) = self.entries.get_mut(index) else {
                continue;
            };
            if child.in_scope {
                continue;
            }
            pending.extend(child.associations.iter().copied());
            if matches!(child.slot, Slot::Present(_)) {
                child.slot = Slot::Deleted;
                tracing::trace!(context = %self.id, index, "Associated bean cleaned");
            }
        }
    }

    // --- Lookup ---

    pub fn get(&self, id: &Identifier) -> Option<&Value> {
        match &self.entry(id.index())?.slot {
            Slot::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Look up by name. Slower than [`get`](Self::get).
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let id = self.registry.get(name)?;
        self.get(&id)
    }

    /// The value of `id` downcast to `T`.
    pub fn get_as<T: Any>(&self, id: &Identifier) -> Option<&T> {
        self.get(id)?.as_ref().downcast_ref::<T>()
    }

    /// The first present bean, in identifier order, whose value is a `T`.
    pub fn get_by_type<T: Any>(&self) -> Option<&T> {
        self.entries.iter().find_map(|entry| match &entry.slot {
            Slot::Present(v) => v.as_ref().downcast_ref::<T>(),
            _ => None,
        })
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.get(id).is_some()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// Number of present beans.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.slot, Slot::Present(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&Slot> {
        self.entry(index).map(|e| &e.slot)
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.entries.iter().enumerate().map(|(i, e)| (i, &e.slot))
    }

    /// Map-like projection over present and deleted beans.
    pub fn live_view(&mut self) -> LiveView<'_> {
        LiveView::new(self)
    }

    // --- Observers ---

    /// Register an observer. Called from inside an observer, the new one
    /// starts receiving events once the current round is over.
    pub fn add_observer(&mut self, observer: Arc<dyn LifecycleObserver>) -> ObserverId {
        self.observers.add(observer, self.delivering)
    }

    /// Unregister an observer. Called from inside an observer, the removal
    /// takes effect once the current round is over.
    pub fn remove_observer(&mut self, id: ObserverId) -> Option<Arc<dyn LifecycleObserver>> {
        self.observers.remove(id, self.delivering)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Handles to the registered observers, in registration order.
    pub fn observers(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.observers.handles()
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// Called while a delivery is already running (an observer mutating the
    /// context), the event is queued and `Ok` is returned at once. The outer
    /// call delivers queued events in the order they were raised, syncing
    /// the observer list after each round. On the first observer error the
    /// remaining queue is dropped and the error is returned.
    pub fn notify(&mut self, event: LifecycleEvent) -> Result<()> {
        if self.delivering {
            self.queued.push_back(event);
            return Ok(());
        }

        self.delivering = true;
        let result = self.deliver(event);
        self.delivering = false;
        self.queued.clear();
        self.observers.sync();
        result
    }

    fn deliver(&mut self, first: LifecycleEvent) -> Result<()> {
        let mut next = Some(first);
        while let Some(event) = next {
            for (id, observer) in self.observers.snapshot() {
                if let Err(source) = observer.on_event(&event, self) {
                    return Err(observer_failed(id, &event, source));
                }
            }
            self.observers.sync();
            next = self.queued.pop_front();
        }
        Ok(())
    }

    // --- Sub-contexts ---

    /// Create an isolated child context for a nested pass.
    ///
    /// The child resolves names through the same registry but has its own
    /// entries and an empty observer list.
    pub fn fork(&self, owner: impl Into<String>) -> Context {
        let owner = owner.into();
        let child = Context {
            id: ContextId::new(),
            parent: Some(self.id),
            owner: Some(owner),
            registry: Arc::clone(&self.registry),
            entries: Vec::with_capacity(self.registry.len()),
            observers: ObserverList::default(),
            delivering: false,
            queued: VecDeque::new(),
        };
        tracing::debug!(
            parent = %self.id,
            child = %child.id,
            owner = child.owner.as_deref().unwrap_or_default(),
            "Forked sub-context"
        );
        child
    }

    /// Like [`fork`](Self::fork), but the child starts with this context's
    /// observers.
    pub fn fork_with_observers(&self, owner: impl Into<String>) -> Context {
        let mut child = self.fork(owner);
        child.observers = self.observers.detached();
        child
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut beans = f.debug_map();
        for (index, slot) in self.slots() {
            let name = self
                .registry
                .by_index(index)
                .map(|id| id.name().to_string())
                .unwrap_or_else(|| format!("#{index}"));
            match slot {
                Slot::Present(_) => beans.entry(&name, &"<present>"),
                Slot::Deleted => beans.entry(&name, &"<deleted>"),
                Slot::Unset => continue,
            };
        }
        beans.finish()
    }
}
