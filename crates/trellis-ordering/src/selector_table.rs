//! Selector-keyed binding tables and the sorted delivery plan.
//!
//! A configuration binds visitors to element selectors in three phases:
//! `before` the element's children are visited, on each of its `children`,
//! and `after` them. Each phase keeps its own [`SelectorTable`]. Building a
//! [`DeliveryPlan`] sorts every selector's list exactly once; the plan is then
//! immutable and shared by every processing pass.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use trellis_types::Result;

use crate::binding::Binding;
use crate::sorter::{sort, SortOrder};

/// When, relative to an element's children, a visitor runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Before,
    Children,
    After,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Before, Phase::Children, Phase::After];

    /// Producers run first on the way down, consumers first on the way up.
    pub fn sort_order(self) -> SortOrder {
        match self {
            Phase::Before | Phase::Children => SortOrder::ProducersFirst,
            Phase::After => SortOrder::ConsumersFirst,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::Children => "children",
            Phase::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SelectorTable
// ---------------------------------------------------------------------------

/// Bindings grouped by selector, in first-insertion order of selectors.
#[derive(Clone)]
pub struct SelectorTable<H> {
    entries: IndexMap<String, Vec<Binding<H>>>,
}

impl<H> SelectorTable<H> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, selector: impl Into<String>, binding: Binding<H>) {
        self.entries.entry(selector.into()).or_default().push(binding);
    }

    /// Bindings for `selector`, empty if none.
    pub fn get(&self, selector: &str) -> &[Binding<H>] {
        self.entries.get(selector).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bindings for several selectors, concatenated in argument order.
    pub fn collect(&self, selectors: &[&str]) -> Vec<&Binding<H>> {
        selectors
            .iter()
            .flat_map(|selector| self.get(selector))
            .collect()
    }

    pub fn selectors(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Number of selectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of bindings across all selectors.
    pub fn binding_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn remove(&mut self, selector: &str) -> Option<Vec<Binding<H>>> {
        self.entries.shift_remove(selector)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Binding<H>])> + '_ {
        self.entries
            .iter()
            .map(|(selector, bindings)| (selector.as_str(), bindings.as_slice()))
    }

    /// Sort every selector's bindings. Stops at the first cycle.
    pub fn sort(&mut self, order: SortOrder) -> Result<()> {
        for (selector, bindings) in self.entries.iter_mut() {
            let unsorted = std::mem::take(bindings);
            *bindings = sort(unsorted, order).inspect_err(|_| {
                tracing::error!(selector = %selector, %order, "Selector bindings are cyclic");
            })?;
        }
        Ok(())
    }
}

impl<H> Default for SelectorTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for SelectorTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// DeliveryPlan
// ---------------------------------------------------------------------------

/// Collects bindings per phase before sorting.
pub struct DeliveryPlanBuilder<H> {
    before: SelectorTable<H>,
    children: SelectorTable<H>,
    after: SelectorTable<H>,
}

impl<H> DeliveryPlanBuilder<H> {
    pub fn new() -> Self {
        Self {
            before: SelectorTable::new(),
            children: SelectorTable::new(),
            after: SelectorTable::new(),
        }
    }

    pub fn add(&mut self, phase: Phase, selector: impl Into<String>, binding: Binding<H>) -> &mut Self {
        self.table_mut(phase).insert(selector, binding);
        self
    }

    pub fn before(&mut self, selector: impl Into<String>, binding: Binding<H>) -> &mut Self {
        self.add(Phase::Before, selector, binding)
    }

    pub fn children(&mut self, selector: impl Into<String>, binding: Binding<H>) -> &mut Self {
        self.add(Phase::Children, selector, binding)
    }

    pub fn after(&mut self, selector: impl Into<String>, binding: Binding<H>) -> &mut Self {
        self.add(Phase::After, selector, binding)
    }

    fn table_mut(&mut self, phase: Phase) -> &mut SelectorTable<H> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::Children => &mut self.children,
            Phase::After => &mut self.after,
        }
    }

    /// Sort every table. Any cycle aborts the whole build.
    pub fn build(self) -> Result<Arc<DeliveryPlan<H>>> {
        let Self {
            mut before,
            mut children,
            mut after,
        } = self;
        before.sort(Phase::Before.sort_order())?;
        children.sort(Phase::Children.sort_order())?;
        after.sort(Phase::After.sort_order())?;

        let plan = DeliveryPlan {
            before,
            children,
            after,
        };
        tracing::info!(
            before = plan.before.binding_count(),
            children = plan.children.binding_count(),
            after = plan.after.binding_count(),
            "Delivery plan built"
        );
        Ok(Arc::new(plan))
    }
}

impl<H> Default for DeliveryPlanBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted, immutable visitor tables.
#[derive(Debug)]
pub struct DeliveryPlan<H> {
    before: SelectorTable<H>,
    children: SelectorTable<H>,
    after: SelectorTable<H>,
}

impl<H> DeliveryPlan<H> {
    pub fn builder() -> DeliveryPlanBuilder<H> {
        DeliveryPlanBuilder::new()
    }

    pub fn before(&self, selectors: &[&str]) -> Vec<&Binding<H>> {
        self.before.collect(selectors)
    }

    pub fn children(&self, selectors: &[&str]) -> Vec<&Binding<H>> {
        self.children.collect(selectors)
    }

    pub fn after(&self, selectors: &[&str]) -> Vec<&Binding<H>> {
        self.after.collect(selectors)
    }

    pub fn table(&self, phase: Phase) -> &SelectorTable<H> {
        match phase {
            Phase::Before => &self.before,
            Phase::Children => &self.children,
            Phase::After => &self.after,
        }
    }

    /// Every selector with at least one binding in any phase, first seen first.
    pub fn selectors(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for phase in Phase::ALL {
            for selector in self.table(phase).selectors() {
                if !seen.contains(&selector) {
                    seen.push(selector);
                }
            }
        }
        seen
    }

    pub fn binding_count(&self) -> usize {
        Phase::ALL
            .iter()
            .map(|&phase| self.table(phase).binding_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ConsumePredicate;

    fn producer(label: &str, name: &str) -> Binding<()> {
        Binding::new(label, ()).produces([name])
    }

    fn consumer(label: &str, name: &str) -> Binding<()> {
        Binding::new(label, ()).consumes(ConsumePredicate::names([name]))
    }

    fn labels(bindings: &[&Binding<()>]) -> Vec<String> {
        bindings.iter().map(|b| b.label().to_string()).collect()
    }

    #[test]
    fn table_groups_by_selector_in_insertion_order() {
        let mut table = SelectorTable::new();
        table.insert("order", Binding::new("a", ()));
        table.insert("item", Binding::new("b", ()));
        table.insert("order", Binding::new("c", ()));

        assert_eq!(table.selectors().collect::<Vec<_>>(), ["order", "item"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.binding_count(), 3);
        assert_eq!(table.get("order").len(), 2);
        assert!(table.get("missing").is_empty());
    }

    #[test]
    fn collect_concatenates_in_argument_order() {
        let mut table = SelectorTable::new();
        table.insert("order", Binding::new("o1", ()));
        table.insert("*", Binding::new("any", ()));
        table.insert("order", Binding::new("o2", ()));

        let bindings = table.collect(&["*", "order", "missing"]);
        assert_eq!(labels(&bindings), ["any", "o1", "o2"]);
    }

    #[test]
    fn remove_drops_selector() {
        let mut table = SelectorTable::new();
        table.insert("a", Binding::new("x", ()));
        table.insert("b", Binding::new("y", ()));
        assert_eq!(table.remove("a").map(|v| v.len()), Some(1));
        assert!(table.remove("a").is_none());
        assert_eq!(table.selectors().collect::<Vec<_>>(), ["b"]);
    }

    #[test]
    fn sort_sorts_each_selector_independently() {
        let mut table = SelectorTable::new();
        table.insert("order", consumer("reader", "v"));
        table.insert("order", producer("writer", "v"));
        // Same names under another selector form no edge with "order".
        table.insert("item", consumer("item-reader", "v"));
        table.sort(SortOrder::ProducersFirst).unwrap();

        let order: Vec<_> = table.get("order").iter().map(Binding::label).collect();
        assert_eq!(order, ["writer", "reader"]);
        assert_eq!(table.get("item").len(), 1);
    }

    #[test]
    fn plan_sorts_after_phase_consumers_first() {
        let mut builder = DeliveryPlan::builder();
        builder
            .before("order", consumer("c", "v"))
            .before("order", producer("p", "v"))
            .after("order", producer("p-after", "w"))
            .after("order", consumer("c-after", "w"))
            .children("order", Binding::new("child", ()));
        let plan = builder.build().unwrap();

        assert_eq!(labels(&plan.before(&["order"])), ["p", "c"]);
        assert_eq!(labels(&plan.after(&["order"])), ["c-after", "p-after"]);
        assert_eq!(labels(&plan.children(&["order"])), ["child"]);
        assert_eq!(plan.binding_count(), 5);
        assert_eq!(plan.selectors(), ["order"]);
    }

    #[test]
    fn cycle_in_any_phase_aborts_build() {
        let mut builder = DeliveryPlanBuilder::new();
        builder.before("ok", producer("p", "v"));
        builder.add(
            Phase::Children,
            "bad",
            Binding::new("A", ()).produces(["a"]).consumes(ConsumePredicate::names(["b"])),
        );
        builder.add(
            Phase::Children,
            "bad",
            Binding::new("B", ()).produces(["b"]).consumes(ConsumePredicate::names(["a"])),
        );
        let err = builder.build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn plan_is_shareable_across_threads() {
        let mut builder = DeliveryPlanBuilder::new();
        builder.before("order", producer("p", "v"));
        builder.before("order", consumer("c", "v"));
        let plan = builder.build().unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                let plan = Arc::clone(&plan);
                s.spawn(move || {
                    assert_eq!(labels(&plan.before(&["order"])), ["p", "c"]);
                });
            }
        });
    }

    #[test]
    fn phase_parses_lowercase() {
        let phase: Phase = serde_json::from_str("\"children\"").unwrap();
        assert_eq!(phase, Phase::Children);
        assert_eq!(Phase::default(), Phase::Before);
        assert_eq!(Phase::After.sort_order(), SortOrder::ConsumersFirst);
    }
}
