use crate::binding::Binding;

/// Producer → consumer edges between bindings, by position in the input.
///
/// An edge `p → c` means `c` consumes something `p` produces, so `c` must
/// run after `p`. There are no self-edges and at most one edge per pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// `dependants[i]` lists, in input order, the bindings that depend on `i`.
    dependants: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build<H>(bindings: &[Binding<H>]) -> Self {
        let dependants = bindings
            .iter()
            .enumerate()
            .map(|(i, producer)| {
                if !producer.is_producer() {
                    return Vec::new();
                }
                bindings
                    .iter()
                    .enumerate()
                    .filter(|&(j, consumer)| j != i && producer.feeds(consumer))
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        Self { dependants }
    }

    pub fn dependants(&self, index: usize) -> &[usize] {
        self.dependants.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.dependants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependants.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependants.iter().map(Vec::len).sum()
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.dependants(from).contains(&to)
    }
}
