//! Map-like projection of a [`Context`].
//!
//! A bean that was removed still shows up, with a `None` value. Slots that
//! were never set are absent. Writes go through the context so observers see
//! them.

use indexmap::IndexMap;

use trellis_types::Result;

use crate::context::{Context, Slot};
use crate::Value;

pub struct LiveView<'a> {
    ctx: &'a mut Context,
}

impl<'a> LiveView<'a> {
    pub(crate) fn new(ctx: &'a mut Context) -> Self {
        Self { ctx }
    }

    /// `Some(Some(v))` for a present bean, `Some(None)` for a removed one,
    /// `None` if the bean was never set.
    pub fn get(&self, name: &str) -> Option<Option<&Value>> {
        let id = self.ctx.registry().get(name)?;
        match self.ctx.slot(id.index())? {
            Slot::Present(v) => Some(Some(v)),
            Slot::Deleted => Some(None),
            Slot::Unset => None,
        }
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(name, _)| name).collect()
    }

    /// Entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (String, Option<&Value>)> + '_ {
        let registry = self.ctx.registry();
        self.ctx.slots().filter_map(move |(index, slot)| {
            let value = match slot {
                Slot::Present(v) => Some(v),
                Slot::Deleted => None,
                Slot::Unset => return None,
            };
            let name = registry.by_index(index)?.name().to_string();
            Some((name, value))
        })
    }

    /// Add or overwrite a bean. Returns the previous value, if present.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<Option<Value>> {
        let previous = self.ctx.get_by_name(name).cloned();
        self.ctx.add(name, value, None)?;
        Ok(previous)
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        self.ctx.remove(name, None)
    }

    pub fn clear(&mut self) {
        self.ctx.clear();
    }

    pub fn to_map(&self) -> IndexMap<String, Option<Value>> {
        self.iter()
            .map(|(name, value)| (name, value.cloned()))
            .collect()
    }
}
