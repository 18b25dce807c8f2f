use std::io;
use std::path::Path;

use super::MetadataStore;

/// Extended attributes live in the unprivileged `user.` namespace.
const NAMESPACE: &str = "user.";

/// Metadata kept in the filesystem's own extended attributes.
///
/// Attributes travel with the inode, so renames need no extra work.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeStore;

impl NativeStore {
    /// Whether the filesystem holding `probe` accepts user xattrs.
    pub fn is_supported(probe: &Path) -> bool {
        let name = format!("{}archive.probe", NAMESPACE);
        xattr::SUPPORTED_PLATFORM
            && xattr::set(probe, &name, b"1").is_ok()
            && xattr::remove(probe, &name).is_ok()
    }
}

impl MetadataStore for NativeStore {
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<String>> {
        match xattr::get(path, format!("{}{}", NAMESPACE, name))? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }

    fn set(&self, path: &Path, name: &str, value: &str) -> io::Result<()> {
        xattr::set(path, format!("{}{}", NAMESPACE, name), value.as_bytes())
    }

    fn remove(&self, path: &Path, name: &str) -> io::Result<()> {
        let name = format!("{}{}", NAMESPACE, name);
        if xattr::get(path, &name)?.is_none() {
            return Ok(());
        }
        xattr::remove(path, &name)
    }

    fn names(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut out = xattr::list(path)?
            .filter_map(|name| {
                name.to_str()
                    .and_then(|x| x.strip_prefix(NAMESPACE))
                    .map(str::to_string)
            })
            .collect::<Vec<_>>();
        out.sort();
        Ok(out)
    }
}
