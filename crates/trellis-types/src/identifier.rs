//! Bean identifier registry.
//!
//! Every bean name ever referenced gets a stable integer index so contexts
//! can store entries in a dense vector. One registry is shared by every
//! processing pass of a configuration. Lookups of known names read an
//! atomically published snapshot and never lock; only the first registration
//! of a new name takes the registry's allocation mutex.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// A registered bean name and its index in the owning registry.
///
/// Cloning is cheap. Identifiers stay valid for the life of the registry
/// that issued them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    name: Arc<str>,
    index: usize,
}

impl Identifier {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Default)]
struct Snapshot {
    by_name: HashMap<Arc<str>, Identifier>,
    /// Identifiers in allocation order; `by_index[i].index == i`.
    by_index: Vec<Identifier>,
}

/// Name → index allocator shared across concurrent processing passes.
pub struct IdentifierRegistry {
    snap: ArcSwap<Snapshot>,
    alloc: Mutex<()>,
}

impl IdentifierRegistry {
    /// Create an empty registry behind an `Arc`, ready to be shared.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return the identifier for `name`, allocating the next index if the
    /// name has never been seen.
    pub fn get_or_register(&self, name: &str) -> Identifier {
        if let Some(id) = self.get(name) {
            return id;
        }

        let _guard = self.alloc.lock();
        // Another pass may have registered the name while we waited.
        let cur = self.snap.load_full();
        if let Some(id) = cur.by_name.get(name) {
            return id.clone();
        }

        let id = Identifier {
            name: Arc::from(name),
            index: cur.by_index.len(),
        };
        let mut by_name = cur.by_name.clone();
        by_name.insert(id.name.clone(), id.clone());
        let mut by_index = cur.by_index.clone();
        by_index.push(id.clone());
        self.snap.store(Arc::new(Snapshot { by_name, by_index }));

        tracing::debug!(name = %id.name, index = id.index, "Registered bean identifier");
        id
    }

    /// Look up a name without registering it.
    pub fn get(&self, name: &str) -> Option<Identifier> {
        self.snap.load().by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snap.load().by_name.contains_key(name)
    }

    /// The identifier allocated at `index`, if any.
    pub fn by_index(&self, index: usize) -> Option<Identifier> {
        self.snap.load().by_index.get(index).cloned()
    }

    /// Number of identifiers allocated so far.
    pub fn len(&self) -> usize {
        self.snap.load().by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names in allocation order.
    pub fn names(&self) -> Vec<String> {
        self.snap
            .load()
            .by_index
            .iter()
            .map(|id| id.name().to_string())
            .collect()
    }
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self {
            snap: ArcSwap::from_pointee(Snapshot::default()),
            alloc: Mutex::new(()),
        }
    }
}

impl fmt::Debug for IdentifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierRegistry")
            .field("identifiers", &self.snap.load().by_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_allocated_monotonically() {
        let reg = IdentifierRegistry::new();
        let a = reg.get_or_register("a");
        let b = reg.get_or_register("b");
        let c = reg.get_or_register("c");
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn same_name_returns_same_identifier() {
        let reg = IdentifierRegistry::new();
        let first = reg.get_or_register("order");
        let second = reg.get_or_register("order");
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn get_does_not_register() {
        let reg = IdentifierRegistry::new();
        assert!(reg.get("missing").is_none());
        assert!(!reg.contains("missing"));
        assert!(reg.is_empty());
    }

    #[test]
    fn held_identifiers_survive_later_allocations() {
        let reg = IdentifierRegistry::new();
        let held = reg.get_or_register("held");
        for i in 0..100 {
            reg.get_or_register(&format!("bean{i}"));
        }
        assert_eq!(held.index(), 0);
        assert_eq!(reg.by_index(0), Some(held));
    }

    #[test]
    fn names_in_allocation_order() {
        let reg = IdentifierRegistry::new();
        reg.get_or_register("z");
        reg.get_or_register("a");
        assert_eq!(reg.names(), vec!["z".to_string(), "a".to_string()]);
    }

    #[test]
    fn concurrent_first_registration_converges() {
        let reg = IdentifierRegistry::new();
        let indices: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| reg.get_or_register("shared").index()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(indices.iter().all(|&i| i == indices[0]));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn concurrent_distinct_names_get_distinct_indices() {
        let reg = IdentifierRegistry::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let reg = &reg;
                s.spawn(move || {
                    for i in 0..25 {
                        reg.get_or_register(&format!("t{t}-{i}"));
                    }
                });
            }
        });
        assert_eq!(reg.len(), 100);
        for i in 0..100 {
            assert_eq!(reg.by_index(i).unwrap().index(), i);
        }
    }

    #[test]
    fn debug_format_shows_name_and_index() {
        let reg = IdentifierRegistry::new();
        let id = reg.get_or_register("order");
        assert_eq!(format!("{id:?}"), "order#0");
        assert_eq!(id.to_string(), "order");
    }
}
