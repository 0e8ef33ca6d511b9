//! Scoped bean context for Trellis processing passes.
//!
//! A [`Context`] is the named-object store one processing pass uses to share
//! values between visitors. Entries are addressed by [`Identifier`]s from a
//! shared [`IdentifierRegistry`], track whether their defining fragment is
//! still being visited, and announce every lifecycle transition to the
//! context's observers. Nested passes get an isolated [`Context::fork`].
//!
//! [`Identifier`]: trellis_types::Identifier
//! [`IdentifierRegistry`]: trellis_types::IdentifierRegistry

pub mod context;
pub mod events;
pub mod live_view;
pub mod promote;

use std::any::Any;
use std::sync::Arc;

pub use context::{BeanKey, Context, ContextId};
pub use events::{
    EventRecorder, LifecycleEvent, LifecycleKind, LifecycleObserver, ObserverId, ObserverResult,
};
pub use live_view::LiveView;
pub use promote::promote;

/// A bean value. Shared so events can carry it without copying.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wrap any value as a bean [`Value`].
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}
