//! Visitor ordering for Trellis delivery configurations.
//!
//! Visitors declare what bean names they produce and which they consume.
//! This crate turns those declarations into a dependency graph, rejects
//! cyclic configurations, and sorts each selector's visitors so producers
//! run before their consumers. The sorted [`DeliveryPlan`] is built once and
//! shared by every processing pass.

pub mod binding;
pub mod graph;
pub mod selector_table;
pub mod sorter;

pub use binding::{Binding, Capability, ConsumePredicate};
pub use graph::DependencyGraph;
pub use selector_table::{DeliveryPlan, DeliveryPlanBuilder, Phase, SelectorTable};
pub use sorter::{sort, SortOrder};
