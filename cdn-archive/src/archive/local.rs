use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Quarantine, Settings};
use crate::id::ArchiveId;

/// Filesystem identity of one archive entry.
///
/// `uri` is the location handed to callers; it is the file's path rendered
/// as text, so the host can stream from or redirect to it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub id: ArchiveId,
    pub path: PathBuf,
    pub uri: String,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size: u64,
    /// Name of the header a caller re-binds a custom id with.
    pub xhvn: Option<String>,
}

impl Local {
    fn at(id: &ArchiveId, path: PathBuf) -> Local {
        Local {
            id: id.clone(),
            uri: path.to_string_lossy().into_owned(),
            path,
            filename: None,
            extension: None,
            size: 0,
            xhvn: None,
        }
    }

    /// `<archive_prefix>/<shard>/<id>`
    pub fn committed(settings: &Settings, id: &ArchiveId) -> Local {
        Local::at(id, settings.archive_prefix.join(id.shard_path()))
    }

    /// `<temporary_prefix>/<id>`
    pub fn temporary(settings: &Settings, id: &ArchiveId) -> Local {
        Local::at(id, settings.temporary_prefix.join(id.as_str()))
    }

    /// `<quarantine.directory_prefix>/<id>`
    pub fn quarantined(quarantine: &Quarantine, id: &ArchiveId) -> Local {
        Local::at(id, quarantine.directory_prefix.join(id.as_str()))
    }

    /// `<backup_prefix>/<id>.<stamp>`, or `<id>.<stamp>.<serial>` for the
    /// second and later backups taken within the same second.
    pub fn backup(prefix: &Path, id: &ArchiveId, stamp: i64, serial: usize) -> Local {
        let name = match serial {
            0 => format!("{}.{}", id, stamp),
            n => format!("{}.{}.{}", id, stamp, n),
        };
        Local::at(id, prefix.join(name))
    }

    pub fn with_extension(mut self, extension: Option<String>) -> Local {
        self.extension = extension;
        self
    }

    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    pub(crate) fn refresh_size(&mut self) -> std::io::Result<u64> {
        self.size = fs::metadata(&self.path)?.len();
        Ok(self.size)
    }
}
