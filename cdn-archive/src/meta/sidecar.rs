use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::MetadataStore;

const SUFFIX: &str = ".xattrs";

/// Metadata kept in a hidden JSON file beside the content: `a01000001` has
/// its attributes in `.a01000001.xattrs`.
///
/// Every write rewrites the whole sidecar through a rename, so readers never
/// observe a half-written map.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStore;

impl SidecarStore {
    pub fn sidecar_path(path: &Path) -> io::Result<PathBuf> {
        let name = path.file_name().and_then(|x| x.to_str()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no usable file name")
        })?;
        Ok(path.with_file_name(format!(".{}{}", name, SUFFIX)))
    }

    /// Whether `path` is itself a sidecar and not archive content.
    pub fn is_sidecar(path: &Path) -> bool {
        path.file_name()
            .and_then(|x| x.to_str())
            .map(|x| x.starts_with('.') && x.ends_with(SUFFIX))
            .unwrap_or(false)
    }

    fn read(path: &Path) -> io::Result<BTreeMap<String, String>> {
        // The content must exist, exactly as with native xattrs.
        fs::metadata(path)?;

        match fs::read(Self::sidecar_path(path)?) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    fn write(path: &Path, attrs: &BTreeMap<String, String>) -> io::Result<()> {
        let sidecar = Self::sidecar_path(path)?;
        let staging = sidecar.with_extension("xattrs.tmp");
        let bytes = serde_json::to_vec(attrs)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &sidecar)
    }
}

impl MetadataStore for SidecarStore {
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<String>> {
        Ok(Self::read(path)?.remove(name))
    }

    fn set(&self, path: &Path, name: &str, value: &str) -> io::Result<()> {
        let mut attrs = Self::read(path)?;
        attrs.insert(name.to_string(), value.to_string());
        Self::write(path, &attrs)
    }

    fn remove(&self, path: &Path, name: &str) -> io::Result<()> {
        let mut attrs = Self::read(path)?;
        if attrs.remove(name).is_some() {
            Self::write(path, &attrs)?;
        }
        Ok(())
    }

    fn names(&self, path: &Path) -> io::Result<Vec<String>> {
        Ok(Self::read(path)?.into_iter().map(|(k, _)| k).collect())
    }

    fn load(&self, path: &Path) -> io::Result<BTreeMap<String, String>> {
        Self::read(path)
    }

    fn store_all(&self, path: &Path, attrs: &BTreeMap<String, String>) -> io::Result<()> {
        let mut current = Self::read(path)?;
        current.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::write(path, &current)
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = Self::sidecar_path(from)?;
        if !from.exists() {
            return Ok(());
        }
        fs::rename(from, Self::sidecar_path(to)?)
    }

    fn duplicate(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = Self::sidecar_path(from)?;
        if !from.exists() {
            return Ok(());
        }
        fs::copy(from, Self::sidecar_path(to)?).map(|_| ())
    }

    fn discard(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(Self::sidecar_path(path)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_naming() {
        let path = Path::new("/srv/archive/01/a01000001");
        let sidecar = SidecarStore::sidecar_path(path).unwrap();
        assert_eq!(sidecar, Path::new("/srv/archive/01/.a01000001.xattrs"));
        assert!(SidecarStore::is_sidecar(&sidecar));
        assert!(!SidecarStore::is_sidecar(path));
    }

    #[test]
    fn missing_content_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SidecarStore
            .get(&dir.path().join("a01000001"), "archive.id")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn follows_renames_and_unlinks() {
        let dir = tempfile::TempDir::new().unwrap();
        let from = dir.path().join("a01000001");
        let to = dir.path().join("a01000002");
        fs::write(&from, b"x").unwrap();

        let store = SidecarStore;
        store.set(&from, "archive.id", "a01000001").unwrap();

        fs::rename(&from, &to).unwrap();
        store.relocate(&from, &to).unwrap();
        assert_eq!(store.get(&to, "archive.id").unwrap().as_deref(), Some("a01000001"));

        let copy = dir.path().join("a01000003");
        fs::copy(&to, &copy).unwrap();
        store.duplicate(&to, &copy).unwrap();
        assert_eq!(store.names(&copy).unwrap(), vec!["archive.id"]);

        fs::remove_file(&to).unwrap();
        store.discard(&to).unwrap();
        assert!(!SidecarStore::sidecar_path(&to).unwrap().exists());
        store.discard(&to).unwrap();
    }
}
