//! Downstream bookkeeping for committed operations.
//!
//! The archive only stages changes; a host records them (in a database, say)
//! through a [`Registry`] and schedules follow-up work, such as replication
//! to other nodes, through a [`ReplicationQueue`].

use crate::archive::{Operation, PendingCommit, RInfo};
use crate::error::Result;

pub trait Registry {
    /// Record `operation` with the identities it will leave behind.
    ///
    /// Called before the change becomes visible; an error aborts it.
    fn register(&self, operation: Operation, rinfo: &RInfo) -> Result<()>;
}

pub trait ReplicationQueue {
    /// Schedule work for a committed operation.
    fn enqueue(&self, operation: Operation, rinfo: &RInfo) -> Result<()>;
}

/// Registers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegistry;

impl Registry for NoRegistry {
    fn register(&self, _: Operation, _: &RInfo) -> Result<()> {
        Ok(())
    }
}

impl ReplicationQueue for NoRegistry {
    fn enqueue(&self, _: Operation, _: &RInfo) -> Result<()> {
        Ok(())
    }
}

/// Register `pending`, then commit it. A rejected registration rolls the
/// change back. Queueing happens after the commit, so a failure there is
/// logged and otherwise ignored.
pub fn commit_with(
    pending: PendingCommit<'_>,
    registry: &dyn Registry,
    queue: &dyn ReplicationQueue,
) -> Result<RInfo> {
    let operation = pending.operation();

    if let Err(e) = registry.register(operation, pending.rinfo()) {
        tracing::warn!(operation = %operation, error = %e, "registration refused, rolling back");
        if let Err(rollback) = pending.rollback() {
            tracing::warn!(error = %rollback, "rollback failed");
        }
        return Err(e);
    }

    let rinfo = pending.commit()?;

    if let Err(e) = queue.enqueue(operation, &rinfo) {
        tracing::warn!(operation = %operation, error = %e, "could not queue replication");
    }

    Ok(rinfo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        refuse: bool,
        seen: RefCell<Vec<Operation>>,
    }

    impl Registry for Recorder {
        fn register(&self, operation: Operation, _: &RInfo) -> Result<()> {
            if self.refuse {
                return Err(Error::Conflict("refused".into()));
            }
            self.seen.borrow_mut().push(operation);
            Ok(())
        }
    }

    impl ReplicationQueue for Recorder {
        fn enqueue(&self, _: Operation, _: &RInfo) -> Result<()> {
            Err(Error::InternalServerError("queue down".into()))
        }
    }

    fn pending() -> PendingCommit<'static> {
        PendingCommit::new(
            Operation::Patch,
            crate::config::MetadataBackend::Sidecar.store(),
            "archive.",
            RInfo::default(),
        )
    }

    #[test]
    fn registers_before_commit() {
        let registry = Recorder::default();
        commit_with(pending(), &registry, &registry).unwrap();
        assert_eq!(*registry.seen.borrow(), vec![Operation::Patch]);
    }

    #[test]
    fn refused_registration_fails() {
        let registry = Recorder {
            refuse: true,
            ..Recorder::default()
        };
        let err = commit_with(pending(), &registry, &NoRegistry).unwrap_err();
        assert_eq!(err.status(), 409);
    }
}
