//! Visitor binding descriptors.
//!
//! A [`Binding`] wraps a visitor handler together with what it produces and
//! which bean names it consumes. The sorter only ever looks at these
//! declarations, never at the handler itself.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use regex::Regex;

use trellis_types::{Result, TrellisError};

/// How a binding takes part in producer/consumer ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Neither,
    ProducerOnly,
    ConsumerOnly,
    Both,
}

impl Capability {
    fn of(producer: bool, consumer: bool) -> Self {
        match (producer, consumer) {
            (false, false) => Capability::Neither,
            (true, false) => Capability::ProducerOnly,
            (false, true) => Capability::ConsumerOnly,
            (true, true) => Capability::Both,
        }
    }

    /// Tie-break weight used when no dependency decides the order.
    pub fn score(self) -> i8 {
        match self {
            Capability::ProducerOnly => 2,
            Capability::Both | Capability::Neither => 0,
            Capability::ConsumerOnly => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Neither => "neither",
            Capability::ProducerOnly => "producer",
            Capability::ConsumerOnly => "consumer",
            Capability::Both => "producer+consumer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConsumePredicate
// ---------------------------------------------------------------------------

/// Decides whether a binding consumes a given bean name.
#[derive(Clone)]
pub enum ConsumePredicate {
    Names(IndexSet<String>),
    Prefix(String),
    Pattern(Regex),
    /// Consumes everything. Use when a visitor cannot enumerate its inputs.
    Any,
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl ConsumePredicate {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConsumePredicate::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        ConsumePredicate::Prefix(prefix.into())
    }

    /// Compile `pattern`, anchored to the whole name.
    pub fn pattern(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        Regex::new(&anchored)
            .map(ConsumePredicate::Pattern)
            .map_err(|e| TrellisError::InvalidConfig(format!("invalid consume pattern '{pattern}': {e}")))
    }

    pub fn custom(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        ConsumePredicate::Custom(Arc::new(f))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ConsumePredicate::Names(names) => names.contains(name),
            ConsumePredicate::Prefix(prefix) => name.starts_with(prefix.as_str()),
            ConsumePredicate::Pattern(re) => re.is_match(name),
            ConsumePredicate::Any => true,
            ConsumePredicate::Custom(f) => f(name),
        }
    }
}

impl fmt::Debug for ConsumePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumePredicate::Names(names) => f.debug_tuple("Names").field(names).finish(),
            ConsumePredicate::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            ConsumePredicate::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            ConsumePredicate::Any => f.write_str("Any"),
            ConsumePredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// A visitor handler plus its producer/consumer declarations.
#[derive(Clone)]
pub struct Binding<H> {
    label: String,
    handler: H,
    products: Vec<String>,
    consumes: Option<ConsumePredicate>,
    capability: Capability,
}

impl<H> Binding<H> {
    /// A binding that neither produces nor consumes.
    pub fn new(label: impl Into<String>, handler: H) -> Self {
        Self {
            label: label.into(),
            handler,
            products: Vec::new(),
            consumes: None,
            capability: Capability::Neither,
        }
    }

    /// Declare the bean names this binding adds to the context.
    /// Duplicates are dropped; declaration order is kept.
    pub fn produces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.products.contains(&name) {
                self.products.push(name);
            }
        }
        self.refresh_capability();
        self
    }

    /// Declare which bean names this binding reads.
    pub fn consumes(mut self, predicate: ConsumePredicate) -> Self {
        self.consumes = Some(predicate);
        self.refresh_capability();
        self
    }

    fn refresh_capability(&mut self) {
        self.capability = Capability::of(!self.products.is_empty(), self.consumes.is_some());
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn products(&self) -> &[String] {
        &self.products
    }

    pub fn consume_predicate(&self) -> Option<&ConsumePredicate> {
        self.consumes.as_ref()
    }

    /// Whether this binding reads `name`. Always false for non-consumers.
    pub fn consumes_name(&self, name: &str) -> bool {
        self.consumes.as_ref().is_some_and(|p| p.matches(name))
    }

    pub fn is_producer(&self) -> bool {
        matches!(self.capability, Capability::ProducerOnly | Capability::Both)
    }

    pub fn is_consumer(&self) -> bool {
        matches!(self.capability, Capability::ConsumerOnly | Capability::Both)
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Whether `consumer` reads anything this binding produces.
    pub fn feeds<C>(&self, consumer: &Binding<C>) -> bool {
        self.products.iter().any(|name| consumer.consumes_name(name))
    }
}

impl<H> fmt::Debug for Binding<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("label", &self.label)
            .field("products", &self.products)
            .field("consumes", &self.consumes)
            .field("capability", &self.capability)
            .finish()
    }
}
