//! Producer/consumer ordering of visitor bindings.
//!
//! [`sort`] runs in three phases over a [`DependencyGraph`]:
//!
//! 1. Reject cyclic configurations. Every entry is walked depth first with an
//!    explicit frame stack; reaching an entry already on the current path
//!    fails with [`TrellisError::CircularDependency`] carrying the path.
//! 2. Move producers ahead of their consumers. Scan left to right; when an
//!    entry has a dependant sitting before it, move the entry to just before
//!    that dependant and rescan. Unrelated entries keep their relative order.
//! 3. Stable tie-break by [`Capability::score`]: pure producers first, pure
//!    consumers last.
//!
//! [`SortOrder::ConsumersFirst`] reverses the final list.
//!
//! [`Capability::score`]: crate::binding::Capability::score

use std::cmp::Reverse;
use std::fmt;

use trellis_types::{Result, TrellisError};

use crate::binding::Binding;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    #[default]
    ProducersFirst,
    ConsumersFirst,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::ProducersFirst => f.write_str("producers-first"),
            SortOrder::ConsumersFirst => f.write_str("consumers-first"),
        }
    }
}

/// Reorder `bindings` so every producer runs before its consumers.
pub fn sort<H>(bindings: Vec<Binding<H>>, order: SortOrder) -> Result<Vec<Binding<H>>> {
    let graph = DependencyGraph::build(&bindings);

    if let Err(chain) = find_cycle(&graph) {
        let chain: Vec<String> = chain.iter().map(|&i| bindings[i].label().to_string()).collect();
        tracing::error!(chain = %chain.join(" -> "), "Circular visitor dependency");
        return Err(TrellisError::CircularDependency { chain });
    }

    let mut positions = reorder(&graph);
    positions.sort_by_key(|&i| Reverse(bindings[i].capability().score()));
    if order == SortOrder::ConsumersFirst {
        positions.reverse();
    }

    let mut slots: Vec<Option<Binding<H>>> = bindings.into_iter().map(Some).collect();
    let sorted: Vec<Binding<H>> = positions
        .iter()
        .filter_map(|&i| slots[i].take())
        .collect();

    tracing::debug!(
        %order,
        sorted = ?sorted.iter().map(Binding::label).collect::<Vec<_>>(),
        "Sorted visitor bindings"
    );
    Ok(sorted)
}

// ---------------------------------------------------------------------------
// Phase 1: cycle rejection
// ---------------------------------------------------------------------------

/// Returns the offending path (root first, recurring entry repeated at the
/// end) if the graph has a cycle.
fn find_cycle(graph: &DependencyGraph) -> std::result::Result<(), Vec<usize>> {
    let n = graph.len();
    let mut on_path = vec![false; n];
    let mut cleared = vec![false; n];
    // (entry, position of the next dependant to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if cleared[root] {
            continue;
        }
        stack.push((root, 0));
        on_path[root] = true;

        while let Some(frame) = stack.last_mut() {
            let (entry, next) = *frame;
            let Some(&dependant) = graph.dependants(entry).get(next) else {
                stack.pop();
                on_path[entry] = false;
                cleared[entry] = true;
                continue;
            };
            frame.1 += 1;

            if on_path[dependant] {
                let mut chain: Vec<usize> = stack.iter().map(|&(e, _)| e).collect();
                chain.push(dependant);
                return Err(chain);
            }
            if !cleared[dependant] {
                on_path[dependant] = true;
                stack.push((dependant, 0));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase 2: stable reordering
// ---------------------------------------------------------------------------

/// Minimal-displacement order for an acyclic graph, as input indices.
fn reorder(graph: &DependencyGraph) -> Vec<usize> {
    let n = graph.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut position: Vec<usize> = (0..n).collect();

    'scan: loop {
        for i in 0..n {
            let entry = order[i];
            for &dependant in graph.dependants(entry) {
                let j = position[dependant];
                if j < i {
                    order.remove(i);
                    order.insert(j, entry);
                    for (pos, &e) in order.iter().enumerate().take(i + 1).skip(j) {
                        position[e] = pos;
                    }
                    continue 'scan;
                }
            }
        }
        break;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ConsumePredicate;

    fn producer(label: &str, names: &[&str]) -> Binding<()> {
        Binding::new(label, ()).produces(names.iter().copied())
    }

    fn consumer(label: &str, names: &[&str]) -> Binding<()> {
        Binding::new(label, ()).consumes(ConsumePredicate::names(names.iter().copied()))
    }

    fn both(label: &str, produces: &[&str], consumes: &[&str]) -> Binding<()> {
        producer(label, produces).consumes(ConsumePredicate::names(consumes.iter().copied()))
    }

    fn labels(bindings: &[Binding<()>]) -> Vec<&str> {
        bindings.iter().map(Binding::label).collect()
    }

    fn category_mix() -> Vec<Binding<()>> {
        vec![
            producer("A", &["x"]),
            Binding::new("B", ()),
            consumer("C", &["z"]),
        ]
    }

    #[test]
    fn category_order_without_edges() {
        let sorted = sort(category_mix(), SortOrder::ProducersFirst).unwrap();
        assert_eq!(labels(&sorted), ["A", "B", "C"]);

        let sorted = sort(category_mix(), SortOrder::ConsumersFirst).unwrap();
        assert_eq!(labels(&sorted), ["C", "B", "A"]);
    }

    #[test]
    fn pure_producers_float_and_pure_consumers_sink() {
        let input = vec![
            consumer("C", &["z"]),
            Binding::new("B", ()),
            producer("A", &["x"]),
        ];
        let sorted = sort(input, SortOrder::ProducersFirst).unwrap();
        assert_eq!(labels(&sorted), ["A", "B", "C"]);
    }

    #[test]
    fn producer_moves_ahead_of_its_consumer() {
        let input = vec![
            both("reader", &["r"], &["order"]),
            Binding::new("plain", ()),
            both("creator", &["order"], &["header"]),
        ];
        let sorted = sort(input, SortOrder::ProducersFirst).unwrap();
        assert_eq!(labels(&sorted), ["creator", "reader", "plain"]);
    }

    #[test]
    fn unrelated_bindings_keep_input_order() {
        let input: Vec<_> = (0..9).map(|i| Binding::new(format!("v{i}"), ())).collect();
        let sorted = sort(input, SortOrder::ProducersFirst).unwrap();
        let expected: Vec<String> = (0..9).map(|i| format!("v{i}")).collect();
        assert_eq!(labels(&sorted), expected);

        let input: Vec<_> = (0..9).map(|i| Binding::new(format!("v{i}"), ())).collect();
        let sorted = sort(input, SortOrder::ConsumersFirst).unwrap();
        let reversed: Vec<String> = (0..9).rev().map(|i| format!("v{i}")).collect();
        assert_eq!(labels(&sorted), reversed);
    }

    #[test]
    fn two_way_dependency_is_rejected() {
        let input = vec![both("A", &["a"], &["b"]), both("B", &["b"], &["a"])];
        let err = sort(input, SortOrder::ProducersFirst).unwrap_err();
        assert_eq!(err.dependency_chain().unwrap(), ["A", "B", "A"]);
        let message = err.to_string();
        assert!(message.contains("\tA\n\t\tdepends-on: B\n\t\t\tdepends-on: A"));
    }

    #[test]
    fn cycle_not_through_first_entry_is_found() {
        let input = vec![
            producer("root", &["x"]),
            both("left", &["l"], &["x", "r"]),
            both("right", &["r"], &["l"]),
        ];
        let err = sort(input, SortOrder::ProducersFirst).unwrap_err();
        assert_eq!(err.dependency_chain().unwrap(), ["root", "left", "right", "left"]);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let input = vec![
            consumer("sink", &["l", "r"]),
            both("left", &["l"], &["top"]),
            both("right", &["r"], &["top"]),
            producer("top", &["top"]),
        ];
        let sorted = sort(input, SortOrder::ProducersFirst).unwrap();
        assert_eq!(labels(&sorted), ["top", "left", "right", "sink"]);
    }

    #[test]
    fn empty_input_sorts_to_empty() {
        let sorted = sort(Vec::<Binding<()>>::new(), SortOrder::ConsumersFirst).unwrap();
        assert!(sorted.is_empty());
    }

    #[test]
    fn handlers_travel_with_their_bindings() {
        let input = vec![
            Binding::new("c", 1_u8).consumes(ConsumePredicate::names(["v"])),
            Binding::new("p", 2_u8).produces(["v"]),
        ];
        let sorted = sort(input, SortOrder::ProducersFirst).unwrap();
        let handlers: Vec<u8> = sorted.into_iter().map(Binding::into_handler).collect();
        assert_eq!(handlers, [2, 1]);
    }

    #[test]
    fn reorder_is_minimal_displacement() {
        let bindings = vec![
            consumer("c", &["v"]),
            Binding::new("n1", ()),
            Binding::new("n2", ()),
            producer("p", &["v"]),
            Binding::new("n3", ()),
        ];
        let graph = DependencyGraph::build(&bindings);
        assert_eq!(reorder(&graph), [3, 0, 1, 2, 4]);
    }

    #[test]
    fn sort_order_display() {
        assert_eq!(SortOrder::default(), SortOrder::ProducersFirst);
        assert_eq!(SortOrder::ConsumersFirst.to_string(), "consumers-first");
    }
}
