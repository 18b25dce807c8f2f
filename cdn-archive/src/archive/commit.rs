use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::RInfo;
use crate::attrs::Attributes;
use crate::error::{IoContext, Result};
use crate::meta::{MetadataStore, XAttr};

/// The mutation a [`PendingCommit`] carries out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Patch,
    Move,
    Delete,
    Recover,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::Move => "move",
            Operation::Delete => "delete",
            Operation::Recover => "recover",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filesystem change, applied in order on commit and undone in reverse
/// when a later step fails.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Rename { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    /// Make the attribute set of `path` equal to `attrs`.
    WriteAttrs {
        path: PathBuf,
        attrs: Attributes,
        previous: Attributes,
    },
    /// Cannot be undone; only ever the last step.
    Remove { path: PathBuf },
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Step {
    fn apply(&self, store: &dyn MetadataStore, prefix: &str) -> Result<()> {
        match self {
            Step::Rename { from, to } => {
                ensure_parent(to).subject(to.display())?;
                fs::rename(from, to).subject(from.display())?;
                store.relocate(from, to).subject(to.display())
            }
            Step::Copy { from, to } => {
                ensure_parent(to).subject(to.display())?;
                fs::copy(from, to).subject(from.display())?;
                store.duplicate(from, to).subject(to.display())
            }
            Step::WriteAttrs { path, attrs, .. } => XAttr::new(store, path, prefix).replace_all(attrs),
            Step::Remove { path } => {
                remove_if_present(path).subject(path.display())?;
                store.discard(path).subject(path.display())
            }
        }
    }

    fn undo(&self, store: &dyn MetadataStore, prefix: &str) -> Result<()> {
        match self {
            Step::Rename { from, to } => {
                fs::rename(to, from).subject(to.display())?;
                store.relocate(to, from).subject(from.display())
            }
            Step::Copy { to, .. } => {
                remove_if_present(to).subject(to.display())?;
                store.discard(to).subject(to.display())
            }
            Step::WriteAttrs { path, previous, .. } => {
                XAttr::new(store, path, prefix).replace_all(previous)
            }
            Step::Remove { path } => {
                tracing::warn!("cannot restore removed file {}", path.display());
                Ok(())
            }
        }
    }
}

/// A staged mutation. Nothing visible under the archive prefix changes
/// until [`PendingCommit::commit`]; [`PendingCommit::rollback`] discards the
/// staged files instead.
///
/// Dropping an unresolved commit rolls it back.
#[must_use = "a pending commit is rolled back when dropped"]
pub struct PendingCommit<'a> {
    operation: Operation,
    store: &'a dyn MetadataStore,
    prefix: &'a str,
    on_commit: Vec<Step>,
    on_rollback: Vec<Step>,
    rinfo: RInfo,
    resolved: bool,
}

impl<'a> PendingCommit<'a> {
    pub(crate) fn new(
        operation: Operation,
        store: &'a dyn MetadataStore,
        prefix: &'a str,
        rinfo: RInfo,
    ) -> PendingCommit<'a> {
        PendingCommit {
            operation,
            store,
            prefix,
            on_commit: vec![],
            on_rollback: vec![],
            rinfo,
            resolved: false,
        }
    }

    pub(crate) fn on_commit(&mut self, step: Step) -> &mut Self {
        self.on_commit.push(step);
        self
    }

    pub(crate) fn on_rollback(&mut self, step: Step) -> &mut Self {
        self.on_rollback.push(step);
        self
    }

    pub(crate) fn set_rinfo(&mut self, rinfo: RInfo) {
        self.rinfo = rinfo;
    }

    #[inline(always)]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// What the caller will be told once this commits.
    #[inline(always)]
    pub fn rinfo(&self) -> &RInfo {
        &self.rinfo
    }

    /// Whether committing would change nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.on_commit.is_empty()
    }

    pub fn commit(mut self) -> Result<RInfo> {
        self.resolved = true;
        let steps = std::mem::take(&mut self.on_commit);

        for (i, step) in steps.iter().enumerate() {
            if let Err(e) = step.apply(self.store, self.prefix) {
                tracing::warn!(
                    operation = %self.operation,
                    error = %e,
                    "commit failed, undoing {} applied step(s)",
                    i
                );
                for applied in steps[..i].iter().rev() {
                    if let Err(undo) = applied.undo(self.store, self.prefix) {
                        tracing::warn!(error = %undo, "undo failed");
                    }
                }
                self.discard_staged();
                return Err(e);
            }
        }

        tracing::info!(
            operation = %self.operation,
            id = self.rinfo.new_id.as_deref().unwrap_or(""),
            "committed"
        );
        Ok(std::mem::take(&mut self.rinfo))
    }

    pub fn rollback(mut self) -> Result<()> {
        self.resolved = true;
        tracing::debug!(operation = %self.operation, "rolling back");

        let mut first_error = None;
        for step in std::mem::take(&mut self.on_rollback).iter() {
            if let Err(e) = step.apply(self.store, self.prefix) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn discard_staged(&mut self) {
        for step in std::mem::take(&mut self.on_rollback).iter() {
            if let Err(e) = step.apply(self.store, self.prefix) {
                tracing::warn!(error = %e, "could not discard staged file");
            }
        }
    }
}

impl Drop for PendingCommit<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        tracing::warn!(
            operation = %self.operation,
            "pending commit dropped without commit or rollback, rolling back"
        );
        self.discard_staged();
    }
}

impl fmt::Debug for PendingCommit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommit")
            .field("operation", &self.operation)
            .field("on_commit", &self.on_commit)
            .field("on_rollback", &self.on_rollback)
            .field("rinfo", &self.rinfo)
            .finish()
    }
}
