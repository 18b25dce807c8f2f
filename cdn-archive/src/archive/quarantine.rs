//! Entries deleted into quarantine, and their expiry.
//!
//! A quarantined entry keeps its attributes and gains
//! `quarantine.expires-at` (unix seconds). [`purge`] removes the expired
//! ones; [`Archive::recover`] moves a live one back.

use std::convert::TryFrom;
use std::fs;
use std::io;

use chrono::{DateTime, Utc};

use super::commit::{Operation, PendingCommit, Step};
use super::{timestamp, Archive, Local, RInfo};
use crate::attrs;
use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::id::ArchiveId;
use crate::meta::{MetadataStore, SidecarStore, XAttr};

/// Remove every quarantined entry that expired at or before `now`, using the
/// configured metadata backend.
pub fn purge(config: &Config, now: DateTime<Utc>) -> Result<Vec<ArchiveId>> {
    purge_with(config, config.settings.metadata.store(), now)
}

pub fn purge_with(
    config: &Config,
    store: &dyn MetadataStore,
    now: DateTime<Utc>,
) -> Result<Vec<ArchiveId>> {
    let quarantine = match &config.settings.quarantine {
        Some(q) => q,
        None => {
            tracing::debug!("no quarantine configured, nothing to purge");
            return Ok(vec![]);
        }
    };

    let dir = &quarantine.directory_prefix;
    let entries = match fs::read_dir(dir) {
        Ok(x) => x,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(Error::io(dir.display(), e)),
    };

    let now = now.timestamp();
    let mut purged = vec![];

    for entry in entries {
        let path = entry.subject(dir.display())?.path();
        if SidecarStore::is_sidecar(&path) || !path.is_file() {
            continue;
        }

        let id = match path
            .file_name()
            .and_then(|x| x.to_str())
            .map(ArchiveId::new)
        {
            Some(Ok(id)) => id,
            _ => {
                tracing::warn!(path = %path.display(), "skipping unrecognised file in quarantine");
                continue;
            }
        };

        let xattr = XAttr::new(store, &path, &config.settings.xattr_prefix);
        let expires = match xattr.get_u64(attrs::QUARANTINE_EXPIRES_AT) {
            Ok(Some(x)) => x,
            Ok(None) => {
                tracing::warn!(id = %id, "quarantined entry has no expiry, keeping it");
                continue;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "unreadable quarantine expiry, keeping it");
                continue;
            }
        };

        if i64::try_from(expires).map_or(true, |x| x > now) {
            continue;
        }

        fs::remove_file(&path).subject(&id)?;
        store.discard(&path).subject(&id)?;
        tracing::info!(id = %id, expires, "purged");
        purged.push(id);
    }

    Ok(purged)
}

pub(crate) fn recover<'a>(archive: &Archive<'a>, id: &str) -> Result<PendingCommit<'a>> {
    let settings = archive.settings();
    let quarantine = settings.quarantine.as_ref().ok_or_else(|| {
        Error::MethodNotAllowed("recovery needs a configured quarantine".into())
    })?;

    let id = ArchiveId::new(id)?;
    let source = Local::quarantined(quarantine, &id);
    if !source.exists() {
        return Err(Error::NotFound(format!("{} is not in quarantine", id)));
    }

    let previous = archive.xattr(&source.path).get_all()?;
    let now = Utc::now();
    let expired = previous
        .get(attrs::QUARANTINE_EXPIRES_AT)
        .and_then(|x| x.parse::<i64>().ok())
        .map(|x| x <= now.timestamp())
        .unwrap_or(false);
    if expired {
        return Err(Error::NotFound(format!("{} has expired", id)));
    }

    let target = Local::committed(settings, &id);
    if target.exists() {
        return Err(Error::Conflict(format!("{} exists in the archive again", id)));
    }

    let mut restored = previous.clone();
    restored.remove(attrs::QUARANTINE_EXPIRES_AT);
    archive.audit(&mut restored, Operation::Recover, &timestamp(now));

    let mut pending = PendingCommit::new(
        Operation::Recover,
        archive.store(),
        &settings.xattr_prefix,
        RInfo::between(Some(&source), Some(&target))
            .with_attrs(archive.config().h2e.response(&restored)),
    );
    pending
        .on_commit(Step::WriteAttrs {
            path: source.path.clone(),
            attrs: restored,
            previous,
        })
        .on_commit(Step::Rename {
            from: source.path.clone(),
            to: target.path,
        });

    tracing::debug!(id = %id, "recovery staged");
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetadataBackend, Quarantine};
    use chrono::TimeZone;

    #[test]
    fn purges_only_expired_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.settings.metadata = MetadataBackend::Sidecar;
        config.settings.quarantine = Some(Quarantine {
            directory_prefix: dir.path().to_path_buf(),
            validity: 60,
        });
        let store = config.settings.metadata.store();
        let prefix = config.settings.xattr_prefix.clone();

        let entries = &[
            ("a01000001", Some("100")),
            ("a02000002", Some("300")),
            ("a03000003", None),
            ("a04000004", Some("soon")),
            ("a05000005", Some("18446744073709551615")),
        ];
        for (id, expires) in entries {
            let path = dir.path().join(id);
            fs::write(&path, b"x").unwrap();
            if let Some(expires) = expires {
                XAttr::new(store, &path, &prefix)
                    .set(attrs::QUARANTINE_EXPIRES_AT, expires)
                    .unwrap();
            }
        }

        let purged = purge(&config, Utc.timestamp(200, 0)).unwrap();
        assert_eq!(purged, vec![ArchiveId::new("a01000001").unwrap()]);
        assert!(!dir.path().join("a01000001").exists());
        assert!(dir.path().join("a02000002").exists());
        assert!(dir.path().join("a03000003").exists());
        assert!(dir.path().join("a04000004").exists());
        assert!(dir.path().join("a05000005").exists());
    }

    #[test]
    fn purge_without_quarantine_is_empty() {
        let config = Config::default();
        assert!(purge(&config, Utc::now()).unwrap().is_empty());
    }
}
