//! The archive: committed entries on disk, each carrying its metadata as
//! prefixed attributes.
//!
//! Every operation is a session borrowed from [`Archive`]. [`Archive::create`]
//! hands out an [`Upload`], [`Archive::open`] an [`Entry`]. Mutations end in a
//! [`PendingCommit`] that the caller commits once downstream bookkeeping has
//! succeeded, or rolls back.
//!
//! No lock is taken per id: two sessions racing on the same entry both
//! succeed, and the last rename into place wins.

use std::fmt;
use std::fs;

use chrono::{DateTime, SecondsFormat, Utc};
use relative_path::{Component, RelativePath};

use crate::act::{self, Act, ActError};
use crate::attrs::{self, Attributes};
use crate::config::{Config, Settings};
use crate::error::{Error, IoContext, Result};
use crate::hashing::{hash_file, ContentDigest};
use crate::headers::Headers;
use crate::id::{ArchiveId, IdGenerator};
use crate::meta::{MetadataStore, XAttr};

mod commit;
mod entry;
mod local;
pub mod quarantine;
mod rinfo;
mod upload;

pub use self::commit::{Operation, PendingCommit};
pub use self::entry::Entry;
pub use self::local::Local;
pub use self::rinfo::RInfo;
pub use self::upload::{Replacement, Upload};

use self::commit::Step;

/// Attempts at finding an unused generated id before giving up.
const ID_ATTEMPTS: usize = 16;
const BACKUP_ATTEMPTS: usize = 1000;

/// What a session intends to do with an entry, chosen when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Inspect metadata only, without a permission check.
    NotSet,
    Create,
    Modify,
    Patch,
    Delete,
    Move,
    Read,
    Validate,
}

impl Mode {
    /// The access right checked when an entry is opened in this mode.
    pub fn right(self) -> Option<&'static str> {
        match self {
            Mode::NotSet => None,
            Mode::Read | Mode::Validate => Some("r"),
            Mode::Create | Mode::Modify | Mode::Patch | Mode::Move => Some("w"),
            Mode::Delete => Some("d"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::NotSet => "inspect",
            Mode::Create => "create",
            Mode::Modify => "modify",
            Mode::Patch => "patch",
            Mode::Delete => "delete",
            Mode::Move => "move",
            Mode::Read => "read",
            Mode::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// Current time as stored in `*.at` attributes.
pub(crate) fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Copy `overlay` onto `target`, skipping names the archive maintains.
pub(crate) fn overlay(target: &mut Attributes, overlay: &Attributes) {
    for (name, value) in overlay.iter() {
        if attrs::is_protected(name) {
            tracing::debug!("ignoring caller value for maintained attribute `{}`", name);
            continue;
        }
        target.insert(name.clone(), value.clone());
    }
}

/// Per-request handle on the archive.
///
/// Holds the shared configuration and the request headers by reference; both
/// must outlive it. The exclusive borrow taken by each session keeps one
/// operation in flight per handle.
pub struct Archive<'a> {
    config: &'a Config,
    headers: &'a Headers,
    act: Act<'a>,
    store: &'a dyn MetadataStore,
    ids: &'a dyn IdGenerator,
}

impl<'a> Archive<'a> {
    /// Bind the access control variables for this request.
    pub fn new(
        config: &'a Config,
        headers: &'a Headers,
        ids: &'a dyn IdGenerator,
    ) -> Result<Archive<'a>> {
        let mut act = Act::new(&config.act, headers);
        act.setup()?;

        Ok(Archive {
            config,
            headers,
            act,
            store: config.settings.metadata.store(),
            ids,
        })
    }

    /// Replace the metadata backend chosen by the configuration.
    pub fn with_store(mut self, store: &'a dyn MetadataStore) -> Archive<'a> {
        self.store = store;
        self
    }

    #[inline(always)]
    pub fn config(&self) -> &'a Config {
        self.config
    }

    #[inline(always)]
    pub fn settings(&self) -> &'a Settings {
        &self.config.settings
    }

    pub fn act(&self) -> &Act<'a> {
        &self.act
    }

    pub fn act_mut(&mut self) -> &mut Act<'a> {
        &mut self.act
    }

    pub fn store(&self) -> &'a dyn MetadataStore {
        self.store
    }

    /// Attribute handle on any path, scoped to the configured prefix.
    pub fn xattr<P: Into<std::path::PathBuf>>(&self, path: P) -> XAttr<'a> {
        let config: &'a Config = self.config;
        XAttr::new(self.store, path, &config.settings.xattr_prefix)
    }

    /// Who the request acts for: the requester header, or this archivist.
    pub fn requester(&self) -> &'a str {
        let headers: &'a Headers = self.headers;
        let settings = self.settings();
        headers
            .get(&settings.requester_header)
            .unwrap_or(settings.archivist.as_str())
    }

    /// Attributes carried by this request's headers.
    pub fn collect_attributes(&self) -> Result<Attributes> {
        self.config.h2e.collect(self.headers)
    }

    /// Start an upload, into a reserved id or a freshly generated one.
    pub fn create(
        &mut self,
        declared_size: Option<u64>,
        reserved: Option<&str>,
    ) -> Result<Upload<'_, 'a>> {
        let id = match reserved {
            Some(raw) => {
                let id = ArchiveId::new(raw)?;
                if Local::committed(self.settings(), &id).exists() {
                    return Err(Error::Conflict(format!("{} already exists", id)));
                }
                id
            }
            None => self.fresh_id()?,
        };

        Upload::new(self, id, declared_size)
    }

    /// Open the entry named by the last segment of `path`.
    ///
    /// `discover` receives the entry's `xhvn` attribute and picks the mode;
    /// the matching access right is checked before the entry is handed out.
    pub fn open<F>(&mut self, path: &str, discover: F) -> Result<Entry<'_, 'a>>
    where
        F: FnOnce(Option<&str>) -> Mode,
    {
        Entry::open(self, path, discover)
    }

    /// Adopt a file staged outside the archive under a fresh id.
    ///
    /// `from_uri` is resolved against `moves_prefix` when one is configured.
    /// With `backup` the source is copied and left in place; otherwise it is
    /// moved, and a rollback moves it back.
    pub fn move_from(
        &mut self,
        from_uri: &str,
        attrs: &Attributes,
        preserved: &Attributes,
        backup: bool,
    ) -> Result<PendingCommit<'a>> {
        let source = self.resolve_move_source(from_uri)?;
        let meta = fs::metadata(&source).subject(from_uri)?;
        if !meta.is_file() {
            return Err(Error::BadRequest(format!("{} is not a file", from_uri)));
        }

        let settings = self.settings();
        let id = self.fresh_id()?;
        let temp = Local::temporary(settings, &id);
        let target = Local::committed(settings, &id);

        fs::create_dir_all(&settings.temporary_prefix)
            .subject(settings.temporary_prefix.display())?;

        let mut pending = PendingCommit::new(
            Operation::Move,
            self.store,
            &settings.xattr_prefix,
            RInfo::default(),
        );

        let original = self.xattr(&source).get_all()?;

        if backup {
            fs::copy(&source, &temp.path).subject(from_uri)?;
            pending.on_rollback(Step::Remove {
                path: temp.path.clone(),
            });
        } else {
            fs::rename(&source, &temp.path).subject(from_uri)?;
            self.store.relocate(&source, &temp.path).subject(from_uri)?;
            pending.on_rollback(Step::Rename {
                from: temp.path.clone(),
                to: source.clone(),
            });
        }

        let (md5, len) = hash_file::<ContentDigest>(&temp.path).subject(temp.path.display())?;

        let mut merged = preserved.clone();
        merged.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(name) = source.file_name().and_then(|x| x.to_str()) {
            merged
                .entry(attrs::FILENAME.to_string())
                .or_insert_with(|| name.to_string());
        }
        self.stamp_created(&mut merged, &id, &md5, len, Operation::Move)?;
        self.xattr(&temp.path).replace_all(&merged)?;
        if !backup {
            pending.on_rollback(Step::WriteAttrs {
                path: source.clone(),
                attrs: original,
                previous: merged.clone(),
            });
        }

        pending.on_commit(Step::Rename {
            from: temp.path.clone(),
            to: target.path.clone(),
        });

        let mut rinfo = RInfo::between(None, Some(&target))
            .with_attrs(self.config.h2e.response(&merged));
        rinfo.old_uri = Some(from_uri.to_string());
        pending.set_rinfo(rinfo);

        tracing::debug!(from = from_uri, id = %id, len, "move staged");
        Ok(pending)
    }

    fn resolve_move_source(&self, from_uri: &str) -> Result<std::path::PathBuf> {
        let path = from_uri.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
        let rel = RelativePath::new(path.trim_start_matches('/')).normalize();

        if rel.as_str().is_empty() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::BadRequest(format!(
                "{} does not name a staged file",
                from_uri
            )));
        }

        Ok(match &self.settings().moves_prefix {
            Some(prefix) => rel.to_path(prefix),
            None => rel.to_path("/"),
        })
    }

    /// An id no committed or temporary file uses yet.
    fn fresh_id(&self) -> Result<ArchiveId> {
        let settings = self.settings();
        for _ in 0..ID_ATTEMPTS {
            let id = self.ids.next_id(settings.id_type);
            if !Local::committed(settings, &id).exists() && !Local::temporary(settings, &id).exists()
            {
                return Ok(id);
            }
            tracing::debug!(id = %id, "generated id already taken");
        }
        Err(Error::InternalServerError(format!(
            "no free id after {} attempts",
            ID_ATTEMPTS
        )))
    }

    /// Where the current version of `id` is copied when a backup is asked
    /// for. Never names an existing backup.
    fn backup_location(&self, id: &ArchiveId) -> Result<Local> {
        let prefix = self.settings().backup_prefix.as_ref().ok_or_else(|| {
            Error::InternalServerError("a backup was requested but no backup_prefix is set".into())
        })?;
        let stamp = Utc::now().timestamp();
        for serial in 0..BACKUP_ATTEMPTS {
            let local = Local::backup(prefix, id, stamp, serial);
            if !local.exists() {
                return Ok(local);
            }
        }
        Err(Error::Conflict(format!(
            "{} already has {} backups from this second",
            id, BACKUP_ATTEMPTS
        )))
    }

    /// Compile `permissions.hr` (or the default rules) into
    /// `permissions.ast.{r,w,d}`. A right without a rule is denied.
    fn stamp_permissions(&self, attrs: &mut Attributes) -> Result<()> {
        let hr = attrs
            .entry(attrs::PERMISSIONS_HR.to_string())
            .or_insert_with(|| self.settings().default_permissions.clone())
            .clone();

        let rules = act::compile_rules(&hr).map_err(|e| match e {
            ActError::Syntax { .. } => Error::BadRequest(format!("permissions: {}", e)),
            e => Error::Exception(e),
        })?;

        for right in attrs::RIGHTS.iter() {
            let rule = rules.get(*right).cloned().unwrap_or_else(|| "0".to_string());
            attrs.insert(attrs::permission_key(right), rule);
        }
        Ok(())
    }

    /// Append this operation to `replication.data`.
    fn audit(&self, attrs: &mut Attributes, operation: Operation, at: &str) {
        let mut history = match attrs.get(attrs::REPLICATION_DATA) {
            None => vec![],
            Some(raw) => match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
                Ok(x) => x,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unreadable replication history");
                    vec![]
                }
            },
        };

        history.push(serde_json::json!({
            "operation": operation.as_str(),
            "by": &self.settings().archivist,
            "at": at,
            "requestee": self.requester(),
        }));

        attrs.insert(
            attrs::REPLICATION_DATA.to_string(),
            serde_json::Value::Array(history).to_string(),
        );
    }

    /// Fill in everything a newly committed entry must carry.
    fn stamp_created(
        &self,
        attrs: &mut Attributes,
        id: &ArchiveId,
        md5: &str,
        len: u64,
        operation: Operation,
    ) -> Result<()> {
        let settings = self.settings();
        let now = timestamp(Utc::now());
        let by = attrs
            .get(attrs::ARCHIVED_BY)
            .cloned()
            .unwrap_or_else(|| self.requester().to_string());

        let mut set = |name: &str, value: &str| {
            attrs.insert(name.to_string(), value.to_string());
        };
        set(attrs::ID, id.as_str());
        set(attrs::CONTENT_LENGTH, &len.to_string());
        set(attrs::MD5, md5);
        set(attrs::ARCHIVIST, &settings.archivist);
        set(attrs::ARCHIVED_BY, &by);
        set(attrs::ARCHIVED_AT, &now);
        set(attrs::CREATED_BY, &by);
        set(attrs::CREATED_AT, &now);
        set(attrs::XATTRS_CREATED_BY, &by);
        set(attrs::XATTRS_CREATED_AT, &now);

        let mut default = |name: &str, value: &str| {
            attrs
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        };
        default(attrs::CONTENT_TYPE, "application/octet-stream");
        default(attrs::BILLING_ID, &settings.billing.id);
        default(attrs::BILLING_TYPE, &settings.billing.kind);

        self.stamp_permissions(attrs)?;
        self.audit(attrs, operation, &now);
        Ok(())
    }

    /// Restore a quarantined entry that has not expired yet.
    pub fn recover(&mut self, id: &str) -> Result<PendingCommit<'a>> {
        quarantine::recover(self, id)
    }
}

impl fmt::Debug for Archive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("settings", &self.config.settings)
            .field("act", &self.act)
            .field("store", &self.store)
            .finish()
    }
}
