//! Moving results of a nested pass into the enclosing context.

use std::sync::Arc;

use trellis_types::{Identifier, Result, SourceInfo, TrellisError};

use crate::context::Context;
use crate::events::{LifecycleEvent, LifecycleKind};

/// Replay the beans `ids` from `child` into `parent`.
///
/// Each present bean is announced to the parent's observers as if its
/// fragment had been visited there: an `EnterScope` notification, an `add`,
/// a `LeaveScope` notification, then a `remove`. Parent observers can wire
/// the value on `Add` and see its fragment end; the parent is left without
/// the bean afterwards. Ids absent from the child are skipped.
///
/// Returns the number of beans promoted.
pub fn promote(
    child: &Context,
    parent: &mut Context,
    ids: &[Identifier],
    source: Option<&SourceInfo>,
) -> Result<usize> {
    if !Arc::ptr_eq(child.registry(), parent.registry()) {
        return Err(TrellisError::RegistryMismatch {
            child: child.id().to_string(),
            parent: parent.id().to_string(),
        });
    }

    let mut promoted = 0;
    for id in ids {
        let Some(value) = child.get(id) else {
            continue;
        };
        let value = Arc::clone(value);

        let enter = LifecycleEvent::new(
            LifecycleKind::EnterScope,
            id.clone(),
            Some(Arc::clone(&value)),
            source.cloned(),
            parent.id(),
        );
        parent.notify(enter)?;
        parent.add(id, Arc::clone(&value), source)?;

        let leave = LifecycleEvent::new(
            LifecycleKind::LeaveScope,
            id.clone(),
            Some(value),
            source.cloned(),
            parent.id(),
        );
        parent.notify(leave)?;
        parent.remove(id, source)?;
        promoted += 1;
    }

    tracing::debug!(
        child = %child.id(),
        parent = %parent.id(),
        promoted,
        "Promoted nested-pass beans"
    );
    Ok(promoted)
}
