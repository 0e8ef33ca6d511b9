//! Shared types, errors, and identifiers for the Trellis visitor core.
//!
//! This crate provides the foundational types used across all other Trellis crates:
//! - `TrellisError`: unified error taxonomy
//! - `SourceInfo`: where in the document tree an operation happened
//! - `Identifier` / `IdentifierRegistry`: stable integer indices for named beans

pub mod identifier;

pub use identifier::{Identifier, IdentifierRegistry};

use serde::{Deserialize, Serialize};

/// Unified error type for all Trellis subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    // === Configuration Errors ===
    #[error("Invalid 2-way/circular visitor producer/consumer dependency detected in configuration.\n{}", render_chain(.chain))]
    CircularDependency { chain: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Context Errors ===
    #[error("Bean '{name}' can't be changed because it isn't in the context")]
    BeanNotPresent { name: String },

    #[error("Identifier index {index} was not issued by this registry")]
    UnknownIdentifier { index: usize },

    #[error("Contexts '{child}' and '{parent}' do not share an identifier registry")]
    RegistryMismatch { child: String, parent: String },

    #[error("Observer failed on {event} of bean '{name}': {source}")]
    Observer {
        event: String,
        name: String,
        #[source]
        source: ObserverError,
    },

    // === I/O ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrellisError {
    /// Returns `true` if the error was raised while building a configuration
    /// and processing must not start.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TrellisError::CircularDependency { .. } | TrellisError::InvalidConfig(_)
        )
    }

    /// The dependency chain of a circular dependency error, root first.
    pub fn dependency_chain(&self) -> Option<&[String]> {
        match self {
            TrellisError::CircularDependency { chain } => Some(chain),
            _ => None,
        }
    }
}

/// Renders a dependency chain one element per line, each line indented one
/// tab deeper than the last.
fn render_chain(chain: &[String]) -> String {
    let mut out = String::new();
    for (depth, label) in chain.iter().enumerate() {
        if depth > 0 {
            out.push('\n');
        }
        for _ in 0..=depth {
            out.push('\t');
        }
        if depth > 0 {
            out.push_str("depends-on: ");
        }
        out.push_str(label);
    }
    out
}

/// A convenience alias for `Result<T, TrellisError>`.
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Error raised by a lifecycle observer. Propagated to whoever triggered the
/// mutation that produced the event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ObserverError {
    pub message: String,
}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lets an observer that mutates its context use `?` on context calls.
impl From<TrellisError> for ObserverError {
    fn from(err: TrellisError) -> Self {
        Self::new(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SourceInfo: location of an operation in the document tree
// ---------------------------------------------------------------------------

/// Where in the document tree an operation occurred. Passed through to
/// lifecycle events for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Element path from the document root, e.g. `/order/items/item[3]`.
    pub path: String,
    pub depth: usize,
}

impl SourceInfo {
    /// Build from an element path. Depth is the number of path segments.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let depth = path.split('/').filter(|s| !s.is_empty()).count();
        Self { path, depth }
    }

    /// Source info for a child element of this one.
    pub fn child(&self, name: &str) -> Self {
        let path = if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            path,
            depth: self.depth + 1,
        }
    }
}

impl std::fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}
