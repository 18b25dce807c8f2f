use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};

use chrono::Utc;

use super::commit::{Operation, PendingCommit, Step};
use super::{overlay, timestamp, Archive, Local, RInfo};
use crate::attrs::{self, Attributes};
use crate::error::{Error, IoContext, Result};
use crate::hashing::{ContentDigest, HashingWriter};
use crate::id::ArchiveId;

type ContentWriter = HashingWriter<BufWriter<File>, ContentDigest>;

/// Content being written to a temporary file.
///
/// The temporary file is removed if the upload is dropped or destroyed
/// before [`Upload::close`] hands it to a [`PendingCommit`].
pub struct Upload<'s, 'a> {
    archive: &'s mut Archive<'a>,
    temp: Local,
    target: Local,
    writer: Option<ContentWriter>,
    declared: Option<u64>,
    owns_temp: bool,
}

impl<'s, 'a> Upload<'s, 'a> {
    pub(crate) fn new(
        archive: &'s mut Archive<'a>,
        id: ArchiveId,
        declared: Option<u64>,
    ) -> Result<Upload<'s, 'a>> {
        let settings = archive.settings();
        fs::create_dir_all(&settings.temporary_prefix)
            .subject(settings.temporary_prefix.display())?;

        let temp = Local::temporary(settings, &id);
        let target = Local::committed(settings, &id);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp.path)
            .subject(&id)?;

        tracing::debug!(id = %id, path = %temp.path.display(), "upload started");

        Ok(Upload {
            archive,
            temp,
            target,
            writer: Some(HashingWriter::new(BufWriter::new(file))),
            declared,
            owns_temp: true,
        })
    }

    #[inline(always)]
    pub fn id(&self) -> &ArchiveId {
        &self.temp.id
    }

    /// The temporary file being written.
    pub fn temporary(&self) -> &Local {
        &self.temp
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map(|w| w.bytes_written()).unwrap_or(0)
    }

    /// Append `data`, translating failures into the archive taxonomy.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let id = self.temp.id.clone();
        self.write_all(data).subject(id)
    }

    /// Flush buffered content to the temporary file and close it, returning
    /// its digest and length.
    fn finish(&mut self) -> Result<(String, u64)> {
        let writer = self.writer.take().ok_or_else(|| {
            Error::InternalServerError(format!("upload {} already finished", self.temp.id))
        })?;

        let len = writer.bytes_written();
        let (buffered, md5) = writer.finish();
        let file = buffered
            .into_inner()
            .map_err(|e| Error::io(&self.temp.id, e.into_error()))?;
        file.sync_all().subject(&self.temp.id)?;

        if let Some(declared) = self.declared {
            if len != declared {
                return Err(Error::BadRequest(format!(
                    "received {} of {} declared bytes",
                    len, declared
                )));
            }
        }

        self.temp.size = len;
        Ok((md5, len))
    }

    /// Finish the content and stage the new entry.
    ///
    /// `preserved` carries attributes copied from a prior version; `attrs`
    /// overrides them, and the archive's own attributes override both.
    pub fn close(mut self, attrs: &Attributes, preserved: &Attributes) -> Result<PendingCommit<'a>> {
        let (md5, len) = self.finish()?;

        let mut merged = preserved.clone();
        merged.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.archive
            .stamp_created(&mut merged, &self.temp.id, &md5, len, Operation::Create)?;
        self.archive.xattr(&self.temp.path).replace_all(&merged)?;

        let rinfo = RInfo::between(Some(&self.temp), Some(&self.target))
            .with_attrs(self.archive.config.h2e.response(&merged));

        let mut pending = self.pending(Operation::Create, rinfo);
        pending.on_commit(Step::Rename {
            from: self.temp.path.clone(),
            to: self.target.path.clone(),
        });

        tracing::debug!(id = %self.temp.id, len, md5 = %md5, "upload staged");
        Ok(pending)
    }

    /// Abandon the upload and remove its temporary file.
    pub fn destroy(mut self) -> Result<()> {
        self.owns_temp = false;
        self.writer = None;
        tracing::debug!(id = %self.temp.id, "upload destroyed");
        discard(self.archive, &self.temp)
    }

    /// Hand the temporary file over to a pending commit that removes it on
    /// rollback.
    fn pending(&mut self, operation: Operation, rinfo: RInfo) -> PendingCommit<'a> {
        let settings = self.archive.settings();
        let mut pending = PendingCommit::new(
            operation,
            self.archive.store(),
            &settings.xattr_prefix,
            rinfo,
        );
        pending.on_rollback(Step::Remove {
            path: self.temp.path.clone(),
        });
        self.owns_temp = false;
        pending
    }
}

fn discard(archive: &Archive<'_>, temp: &Local) -> Result<()> {
    match fs::remove_file(&temp.path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(Error::io(&temp.id, e)),
        _ => {}
    }
    archive.store().discard(&temp.path).subject(&temp.id)
}

impl Write for Upload<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "upload already finished"))?;

        if let Some(declared) = self.declared {
            if writer.bytes_written() + buf.len() as u64 > declared {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("content exceeds the declared {} bytes", declared),
                ));
            }
        }

        writer.write(buf)
    }

    /// Pushes buffered bytes to disk; the file stays open.
    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.flush()?;
                writer.get_ref().get_ref().sync_data()
            }
            None => Ok(()),
        }
    }
}

impl Drop for Upload<'_, '_> {
    fn drop(&mut self) {
        if !self.owns_temp {
            return;
        }

        self.writer = None;
        tracing::warn!(id = %self.temp.id, "upload dropped unfinished, removing temporary file");
        if let Err(e) = discard(self.archive, &self.temp) {
            tracing::warn!(error = %e, "could not remove temporary file");
        }
    }
}

/// New content for an existing entry, written beside it and renamed over it
/// on commit. The id stays the same.
pub struct Replacement<'s, 'a> {
    upload: Upload<'s, 'a>,
    current: Attributes,
}

impl<'s, 'a> Replacement<'s, 'a> {
    pub(crate) fn new(upload: Upload<'s, 'a>, current: Attributes) -> Replacement<'s, 'a> {
        Replacement { upload, current }
    }

    #[inline(always)]
    pub fn id(&self) -> &ArchiveId {
        self.upload.id()
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.upload.append(data)
    }

    /// Finish the content and stage it over the current version.
    ///
    /// The current attributes carry over unless `preserved` or `attrs`
    /// override them. `archived_by` defaults to the requester. With `backup`
    /// the current version is copied to the backup prefix first.
    pub fn close(
        mut self,
        attrs: &Attributes,
        preserved: &Attributes,
        backup: bool,
        archived_by: Option<&str>,
    ) -> Result<PendingCommit<'a>> {
        let (md5, len) = self.upload.finish()?;
        let archive = &*self.upload.archive;

        let mut merged = self.current.clone();
        overlay(&mut merged, preserved);
        overlay(&mut merged, attrs);

        let now = timestamp(Utc::now());
        let by = archived_by.unwrap_or_else(|| archive.requester()).to_string();
        let id = self.upload.temp.id.clone();
        let length = len.to_string();

        for (name, value) in [
            (attrs::ID, id.as_str()),
            (attrs::CONTENT_LENGTH, length.as_str()),
            (attrs::MD5, md5.as_str()),
            (attrs::ARCHIVIST, archive.settings().archivist.as_str()),
            (attrs::ARCHIVED_BY, by.as_str()),
            (attrs::ARCHIVED_AT, now.as_str()),
            (attrs::MODIFIED_BY, by.as_str()),
            (attrs::MODIFIED_AT, now.as_str()),
            (attrs::XATTRS_MODIFIED_BY, by.as_str()),
            (attrs::XATTRS_MODIFIED_AT, now.as_str()),
        ]
        .iter()
        {
            merged.insert(name.to_string(), value.to_string());
        }
        for name in [attrs::CREATED_BY, attrs::XATTRS_CREATED_BY].iter() {
            merged.entry(name.to_string()).or_insert_with(|| by.clone());
        }
        for name in [attrs::CREATED_AT, attrs::XATTRS_CREATED_AT].iter() {
            merged.entry(name.to_string()).or_insert_with(|| now.clone());
        }

        archive.stamp_permissions(&mut merged)?;
        archive.audit(&mut merged, Operation::Update, &now);
        archive.xattr(&self.upload.temp.path).replace_all(&merged)?;

        let backup = if backup {
            Some(archive.backup_location(&id)?)
        } else {
            None
        };

        let target = self.upload.target.clone();
        let rinfo = RInfo::between(Some(&target), Some(&target))
            .with_attrs(archive.config.h2e.response(&merged));

        let mut pending = self.upload.pending(Operation::Update, rinfo);
        if let Some(backup) = backup {
            pending.on_commit(Step::Copy {
                from: target.path.clone(),
                to: backup.path,
            });
        }
        pending.on_commit(Step::Rename {
            from: self.upload.temp.path.clone(),
            to: target.path,
        });

        tracing::debug!(id = %id, len, md5 = %md5, "replacement staged");
        Ok(pending)
    }

    /// Abandon the new content; the current version is untouched.
    pub fn destroy(self) -> Result<()> {
        self.upload.destroy()
    }
}

impl Write for Replacement<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.upload.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.upload.flush()
    }
}

impl std::fmt::Debug for Upload<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("temp", &self.temp)
            .field("target", &self.target)
            .field("bytes_written", &self.bytes_written())
            .field("declared", &self.declared)
            .finish()
    }
}

impl std::fmt::Debug for Replacement<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replacement")
            .field("upload", &self.upload)
            .finish()
    }
}
