//! One-shot flush/commit policy for mutating terminal calls.
//!
//! A query set or repository carries a pending policy. The next mutating
//! call takes it, which resets both flags, and applies it after its
//! statement: commit when requested, otherwise flush the call's own new
//! objects when a flush was requested.

use std::sync::atomic::{AtomicBool, Ordering};

use repokit_core::RepoResult;

use crate::entity::Entity;
use crate::session::{AssignedKeys, ObjectId, PendingObject, Session};
use crate::value::Value;

/// A lifecycle policy taken for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    /// Flush the call's new objects.
    pub flush: bool,
    /// Commit the transaction.
    pub commit: bool,
}

impl Lifecycle {
    /// Applies the policy to `objects` through `session`.
    pub async fn apply(
        self,
        session: &dyn Session,
        objects: &[ObjectId],
    ) -> RepoResult<AssignedKeys> {
        if self.commit {
            tracing::debug!(objects = objects.len(), "committing after mutation");
            session.commit().await
        } else if self.flush && !objects.is_empty() {
            tracing::debug!(objects = objects.len(), "flushing after mutation");
            session.flush(objects).await
        } else {
            Ok(AssignedKeys::new())
        }
    }
}

/// Pending flags, shared by reference and consumed atomically.
#[derive(Debug, Default)]
pub struct LifecycleFlags {
    flush: AtomicBool,
    commit: AtomicBool,
}

impl Clone for LifecycleFlags {
    fn clone(&self) -> Self {
        let current = self.peek();
        Self::new(current.flush, current.commit)
    }
}

impl LifecycleFlags {
    pub const fn new(flush: bool, commit: bool) -> Self {
        Self {
            flush: AtomicBool::new(flush),
            commit: AtomicBool::new(commit),
        }
    }

    /// A copy with the flush flag replaced.
    pub fn with_flush(&self, flush: bool) -> Self {
        Self::new(flush, self.commit.load(Ordering::Acquire))
    }

    /// A copy with the commit flag replaced.
    pub fn with_commit(&self, commit: bool) -> Self {
        Self::new(self.flush.load(Ordering::Acquire), commit)
    }

    /// Reads the pending policy without consuming it.
    pub fn peek(&self) -> Lifecycle {
        Lifecycle {
            flush: self.flush.load(Ordering::Acquire),
            commit: self.commit.load(Ordering::Acquire),
        }
    }

    /// Takes the pending policy, resetting both flags.
    pub fn take(&self) -> Lifecycle {
        Lifecycle {
            flush: self.flush.swap(false, Ordering::AcqRel),
            commit: self.commit.swap(false, Ordering::AcqRel),
        }
    }
}

/// Adds an entity to the session's unit of work.
pub async fn add_entity<E: Entity>(session: &dyn Session, entity: &E) -> RepoResult<ObjectId> {
    session
        .add(PendingObject::new(E::descriptor(), entity.field_values()))
        .await
}

/// Copies the key assigned to `id`, if any, onto an entity that has none.
pub fn with_assigned_key<E: Entity>(entity: E, id: ObjectId, keys: &AssignedKeys) -> RepoResult<E> {
    let Some(key) = assigned_key(keys, id) else {
        return Ok(entity);
    };
    if !entity.pk()?.is_null() {
        return Ok(entity);
    }
    let pk = E::descriptor().primary_key()?;
    entity.with_fields(&vec![(pk.name.to_string(), key.clone())])
}

/// Looks up the key assigned to `id`.
pub fn assigned_key(keys: &AssignedKeys, id: ObjectId) -> Option<&Value> {
    keys.iter()
        .find(|(assigned, _)| *assigned == id)
        .map(|(_, key)| key)
}
