use std::fs::File;

use chrono::Utc;

use super::commit::{Operation, PendingCommit, Step};
use super::upload::{Replacement, Upload};
use super::{overlay, timestamp, Archive, Local, Mode, RInfo};
use crate::attrs::{self, Attributes};
use crate::config::Quarantine;
use crate::error::{Error, IoContext, Result};
use crate::hashing::{hash_file, ContentDigest};
use crate::id::{id_from_url_path, ArchiveId};

/// An opened, committed entry.
///
/// The attribute snapshot taken at open time drives patches and deletions;
/// the `get_xattr*` accessors read the live values.
pub struct Entry<'s, 'a> {
    archive: &'s mut Archive<'a>,
    local: Local,
    mode: Mode,
    attrs: Attributes,
}

impl<'s, 'a> Entry<'s, 'a> {
    pub(crate) fn open<F>(archive: &'s mut Archive<'a>, path: &str, discover: F) -> Result<Self>
    where
        F: FnOnce(Option<&str>) -> Mode,
    {
        let (id, extension) = id_from_url_path(path)?;
        let mut local = Local::committed(archive.settings(), &id).with_extension(extension);

        local
            .refresh_size()
            .map_err(|_| Error::NotFound(format!("{} does not exist", id)))?;

        let attrs = archive.xattr(&local.path).get_all()?;
        local.xhvn = attrs.get(attrs::XHVN).cloned();
        local.filename = attrs.get(attrs::FILENAME).cloned();

        let mode = discover(local.xhvn.as_deref());

        if let Some(right) = mode.right() {
            let rule = attrs.get(&attrs::permission_key(right)).ok_or_else(|| {
                Error::Forbidden(format!("{} carries no `{}` rule", id, right))
            })?;

            archive.act.bind_attributes(&attrs)?;
            if archive.act.evaluate(rule)? == 0 {
                tracing::debug!(id = %id, mode = %mode, requester = archive.requester(), "denied");
                return Err(Error::Forbidden(format!(
                    "{} may not {} {}",
                    archive.requester(),
                    mode,
                    id
                )));
            }
        }

        tracing::debug!(id = %id, mode = %mode, size = local.size, "opened");

        Ok(Entry {
            archive,
            local,
            mode,
            attrs,
        })
    }

    #[inline(always)]
    pub fn id(&self) -> &ArchiveId {
        &self.local.id
    }

    #[inline(always)]
    pub fn local(&self) -> &Local {
        &self.local
    }

    #[inline(always)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn xhvn(&self) -> Option<&str> {
        self.local.xhvn.as_deref()
    }

    /// Attributes as they were when the entry was opened.
    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    pub fn get_xattr(&self, name: &str) -> Result<Option<String>> {
        self.archive.xattr(&self.local.path).get(name)
    }

    /// Numeric attribute; a stored value that is not a number is an error.
    pub fn get_xattr_u64(&self, name: &str) -> Result<Option<u64>> {
        self.archive.xattr(&self.local.path).get_u64(name)
    }

    pub fn has_xattr(&self, name: &str) -> Result<bool> {
        self.archive.xattr(&self.local.path).has(name)
    }

    pub fn get_xattrs(&self) -> Result<Attributes> {
        self.archive.xattr(&self.local.path).get_all()
    }

    pub fn iterate_xattrs<F: FnMut(&str, &str)>(&self, f: F) -> Result<()> {
        self.archive.xattr(&self.local.path).iterate(f)
    }

    /// Open the stored content for reading.
    pub fn content(&self) -> Result<File> {
        File::open(&self.local.path).subject(&self.local.id)
    }

    fn require(&self, allowed: &[Mode], operation: &str) -> Result<()> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(Error::MethodNotAllowed(format!(
                "cannot {} {} opened for {}",
                operation, self.local.id, self.mode
            )))
        }
    }

    /// End a read. With `for_redirect` only the location is reported;
    /// otherwise the mapped attributes come along.
    pub fn close(self, for_redirect: bool) -> Result<RInfo> {
        let rinfo = RInfo::between(Some(&self.local), Some(&self.local));
        if for_redirect {
            return Ok(rinfo);
        }
        Ok(rinfo.with_attrs(self.archive.config.h2e.response(&self.attrs)))
    }

    /// Change attributes only. Content, `md5` and `content-length` stay as
    /// they are; a patch that changes nothing stages nothing.
    pub fn patch(
        self,
        attrs: &Attributes,
        preserved: &Attributes,
        backup: bool,
    ) -> Result<PendingCommit<'a>> {
        self.require(&[Mode::Patch, Mode::Modify], "patch")?;

        let mut merged = self.attrs.clone();
        overlay(&mut merged, preserved);
        overlay(&mut merged, attrs);

        let archive = &*self.archive;
        let settings = archive.settings();
        let rinfo = RInfo::between(Some(&self.local), Some(&self.local));

        if merged == self.attrs {
            tracing::debug!(id = %self.local.id, "patch changes nothing");
            return Ok(PendingCommit::new(
                Operation::Patch,
                archive.store(),
                &settings.xattr_prefix,
                rinfo.with_attrs(archive.config.h2e.response(&self.attrs)),
            ));
        }

        let now = timestamp(Utc::now());
        let by = archive.requester();
        merged.insert(attrs::XATTRS_MODIFIED_BY.into(), by.into());
        merged.insert(attrs::XATTRS_MODIFIED_AT.into(), now.clone());
        archive.stamp_permissions(&mut merged)?;
        archive.audit(&mut merged, Operation::Patch, &now);

        let mut pending = PendingCommit::new(
            Operation::Patch,
            archive.store(),
            &settings.xattr_prefix,
            rinfo.with_attrs(archive.config.h2e.response(&merged)),
        );

        if backup {
            let backup = archive.backup_location(&self.local.id)?;
            pending.on_commit(Step::Copy {
                from: self.local.path.clone(),
                to: backup.path,
            });
        }

        pending.on_commit(Step::WriteAttrs {
            path: self.local.path.clone(),
            attrs: merged,
            previous: self.attrs.clone(),
        });

        Ok(pending)
    }

    /// Start writing new content for this entry.
    pub fn update(self, declared_size: Option<u64>) -> Result<Replacement<'s, 'a>> {
        self.require(&[Mode::Modify], "update")?;

        let Entry {
            archive,
            local,
            attrs,
            ..
        } = self;

        let upload = Upload::new(archive, local.id, declared_size)?;
        Ok(Replacement::new(upload, attrs))
    }

    /// Remove the entry. With quarantine settings it is moved aside and
    /// stamped with an expiry; without, it is unlinked.
    pub fn delete(self, quarantine: Option<&Quarantine>) -> Result<PendingCommit<'a>> {
        self.require(&[Mode::Delete], "delete")?;

        let archive = &*self.archive;
        let settings = archive.settings();

        let quarantine = match quarantine {
            Some(q) => q,
            None => {
                let mut pending = PendingCommit::new(
                    Operation::Delete,
                    archive.store(),
                    &settings.xattr_prefix,
                    RInfo::between(Some(&self.local), Some(&self.local)),
                );
                pending.on_commit(Step::Remove {
                    path: self.local.path.clone(),
                });
                return Ok(pending);
            }
        };

        let dest = Local::quarantined(quarantine, &self.local.id);
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "{} is still in quarantine from an earlier delete",
                self.local.id
            )));
        }
        let now = Utc::now();
        let expires = (now.timestamp().max(0) as u64).saturating_add(quarantine.validity);

        let mut merged = self.attrs.clone();
        merged.insert(attrs::QUARANTINE_EXPIRES_AT.into(), expires.to_string());
        archive.audit(&mut merged, Operation::Delete, &timestamp(now));

        let mut pending = PendingCommit::new(
            Operation::Delete,
            archive.store(),
            &settings.xattr_prefix,
            RInfo::between(Some(&self.local), Some(&dest))
                .with_attrs(archive.config.h2e.response(&merged)),
        );
        pending
            .on_commit(Step::WriteAttrs {
                path: self.local.path.clone(),
                attrs: merged,
                previous: self.attrs.clone(),
            })
            .on_commit(Step::Rename {
                from: self.local.path.clone(),
                to: dest.path.clone(),
            });

        tracing::debug!(id = %self.local.id, to = %dest.path.display(), expires, "quarantine staged");
        Ok(pending)
    }

    /// Check the stored content and metadata.
    ///
    /// The live digest must equal `archive.md5`, and `md5`, `id` and `attrs`
    /// must match what is stored when given. Names listed in
    /// `settings.non_validated` are skipped when comparing `attrs`.
    pub fn validate(
        &self,
        md5: Option<&str>,
        id: Option<&str>,
        attrs: Option<&Attributes>,
    ) -> Result<()> {
        let stored = self.get_xattrs()?;
        let subject = &self.local.id;

        let stored_md5 = stored
            .get(attrs::MD5)
            .ok_or_else(|| integrity(subject, "no md5 attribute".into()))?;

        if let Some(md5) = md5 {
            if !md5.eq_ignore_ascii_case(stored_md5) {
                return Err(integrity(
                    subject,
                    format!("expected md5 {}, attribute holds {}", md5, stored_md5),
                ));
            }
        }

        let (actual, len) = hash_file::<ContentDigest>(&self.local.path).subject(subject)?;
        if !actual.eq_ignore_ascii_case(stored_md5) {
            return Err(integrity(
                subject,
                format!("content hashes to {}, attribute holds {}", actual, stored_md5),
            ));
        }

        if let Some(stored_len) = stored.get(attrs::CONTENT_LENGTH) {
            if stored_len.parse::<u64>().ok() != Some(len) {
                return Err(integrity(
                    subject,
                    format!("content is {} bytes, attribute holds {}", len, stored_len),
                ));
            }
        }

        if let Some(id) = id {
            if stored.get(attrs::ID).map(String::as_str) != Some(id) {
                return Err(integrity(
                    subject,
                    format!(
                        "expected id {}, attribute holds {}",
                        id,
                        stored.get(attrs::ID).map(String::as_str).unwrap_or("nothing")
                    ),
                ));
            }
        }

        if let Some(expected) = attrs {
            let skipped = &self.archive.settings().non_validated;
            for (name, value) in expected.iter() {
                if skipped.iter().any(|x| x == name) {
                    continue;
                }
                if stored.get(name) != Some(value) {
                    return Err(integrity(
                        subject,
                        format!("attribute `{}` does not hold `{}`", name, value),
                    ));
                }
            }
        }

        tracing::debug!(id = %subject, "validated");
        Ok(())
    }
}

fn integrity(id: &ArchiveId, message: String) -> Error {
    tracing::error!(id = %id, "integrity check failed: {}", message);
    Error::InternalServerError(format!("{}: {}", id, message))
}

impl std::fmt::Debug for Entry<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("local", &self.local)
            .field("mode", &self.mode)
            .finish()
    }
}
