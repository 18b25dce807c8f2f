//! Key-value metadata attached to stored files.
//!
//! Archive metadata is a flat map of string names to string values per file.
//! [`MetadataStore`] is the storage contract; [`NativeStore`] keeps it in
//! filesystem extended attributes, [`SidecarStore`] in a JSON file next to
//! the content for filesystems that refuse user xattrs.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::attrs::Attributes;
use crate::error::{Error, IoContext, Result};

mod native;
mod sidecar;

pub use self::native::NativeStore;
pub use self::sidecar::SidecarStore;

pub trait MetadataStore: Send + Sync + fmt::Debug {
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<String>>;

    fn set(&self, path: &Path, name: &str, value: &str) -> io::Result<()>;

    /// Removing an absent name is not an error.
    fn remove(&self, path: &Path, name: &str) -> io::Result<()>;

    /// All names attached to `path`, sorted.
    fn names(&self, path: &Path) -> io::Result<Vec<String>>;

    fn load(&self, path: &Path) -> io::Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for name in self.names(path)? {
            if let Some(value) = self.get(path, &name)? {
                out.insert(name, value);
            }
        }
        Ok(out)
    }

    fn store_all(&self, path: &Path, attrs: &BTreeMap<String, String>) -> io::Result<()> {
        for (name, value) in attrs.iter() {
            self.set(path, name, value)?;
        }
        Ok(())
    }

    /// Called after the content at `from` was renamed to `to`.
    fn relocate(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Ok(())
    }

    /// Called after the content at `from` was copied to `to`.
    fn duplicate(&self, from: &Path, to: &Path) -> io::Result<()> {
        let attrs = self.load(from)?;
        self.store_all(to, &attrs)
    }

    /// Called after the content at `path` was unlinked.
    fn discard(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Open handle on the attributes of one file, scoped to the archive prefix.
///
/// Names passed in and handed out are relative (`content-type`); the handle
/// adds and strips the prefix (`archive.content-type`).
pub struct XAttr<'a> {
    store: &'a dyn MetadataStore,
    path: PathBuf,
    prefix: &'a str,
}

impl<'a> XAttr<'a> {
    pub fn new<P: Into<PathBuf>>(store: &'a dyn MetadataStore, path: P, prefix: &'a str) -> Self {
        XAttr {
            store,
            path: path.into(),
            prefix,
        }
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get(&self, name: &str) -> Result<Option<String>> {
        self.store
            .get(&self.path, &self.key(name))
            .subject(self.path.display())
    }

    /// Typed get; a stored value that does not parse is an internal error.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name)? {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                Error::InternalServerError(format!(
                    "{}: attribute `{}{}` holds `{}`, not a {}",
                    self.path.display(),
                    self.prefix,
                    name,
                    raw,
                    std::any::type_name::<T>()
                ))
            }),
        }
    }

    pub fn get_u64(&self, name: &str) -> Result<Option<u64>> {
        self.get_parsed::<u64>(name)
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Every attribute under the prefix, with the prefix stripped.
    pub fn get_all(&self) -> Result<Attributes> {
        let all = self.store.load(&self.path).subject(self.path.display())?;
        Ok(all
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(self.prefix)
                    .map(|name| (name.to_string(), v))
            })
            .collect())
    }

    /// Visit every attribute under the prefix in name order.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &str),
    {
        for (name, value) in self.get_all()?.iter() {
            f(name, value);
        }
        Ok(())
    }

    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        self.store
            .set(&self.path, &self.key(name), value)
            .subject(self.path.display())
    }

    pub fn set_all(&self, attrs: &Attributes) -> Result<()> {
        let prefixed = attrs
            .iter()
            .map(|(k, v)| (self.key(k), v.clone()))
            .collect::<BTreeMap<_, _>>();
        self.store
            .store_all(&self.path, &prefixed)
            .subject(self.path.display())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.store
            .remove(&self.path, &self.key(name))
            .subject(self.path.display())
    }

    /// Make the attribute set equal to `attrs`, dropping names not in it.
    pub fn replace_all(&self, attrs: &Attributes) -> Result<()> {
        for name in self.get_all()?.keys() {
            if !attrs.contains_key(name) {
                self.remove(name)?;
            }
        }
        self.set_all(attrs)
    }
}

impl fmt::Debug for XAttr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XAttr")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_access() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a01000001");
        std::fs::write(&path, b"x").unwrap();

        let store = SidecarStore;
        store.set(&path, "unrelated", "1").unwrap();

        let xattr = XAttr::new(&store, &path, "archive.");
        xattr.set("content-length", "10").unwrap();
        xattr.set("content-type", "text/plain").unwrap();

        assert_eq!(xattr.get_u64("content-length").unwrap(), Some(10));
        assert!(xattr.has("content-type").unwrap());
        assert!(!xattr.has("filename").unwrap());
        assert_eq!(
            store.get(&path, "archive.content-type").unwrap().as_deref(),
            Some("text/plain")
        );

        let all = xattr.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all.contains_key("unrelated"));

        let mut seen = vec![];
        xattr.iterate(|k, _| seen.push(k.to_string())).unwrap();
        assert_eq!(seen, vec!["content-length", "content-type"]);
    }

    #[test]
    fn numeric_get_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a01000001");
        std::fs::write(&path, b"x").unwrap();

        let store = SidecarStore;
        let xattr = XAttr::new(&store, &path, "archive.");
        xattr.set("content-length", "ten").unwrap();

        let err = xattr.get_u64("content-length").unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn replace_all_drops_stale_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a01000001");
        std::fs::write(&path, b"x").unwrap();

        let store = SidecarStore;
        let xattr = XAttr::new(&store, &path, "archive.");
        xattr.set("filename", "old.txt").unwrap();
        xattr.set("content-type", "text/plain").unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("content-type".into(), "image/png".into());
        xattr.replace_all(&attrs).unwrap();

        assert_eq!(xattr.get_all().unwrap(), attrs);
    }
}
