use relative_path::RelativePath;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of the zero-padded counter in generated ids.
pub const COUNTER_WIDTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    EmptyPath,
    TooShort,
    InvalidKind,
    InvalidCharacter,
}

impl std::error::Error for IdError {}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl IdError {
    pub fn as_str(&self) -> &str {
        match self {
            IdError::EmptyPath => "no id could be derived from path",
            IdError::TooShort => "id must carry a type letter, a shard and a counter",
            IdError::InvalidKind => "id must start with a lowercase type letter",
            IdError::InvalidCharacter => "id may only contain ascii letters and digits",
        }
    }
}

/// Opaque archive id: one type letter, a two character shard, then a counter.
///
/// `a01000001` has type `a`, shard `01` and counter `000001`.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArchiveId(String);

impl ArchiveId {
    pub fn new<S: AsRef<str>>(value: S) -> Result<ArchiveId, IdError> {
        let value = value.as_ref();
        let mut chars = value.chars();

        match chars.next() {
            None => return Err(IdError::EmptyPath),
            Some(c) if !c.is_ascii_lowercase() => return Err(IdError::InvalidKind),
            Some(_) => {}
        }

        if value.len() < 4 {
            return Err(IdError::TooShort);
        }

        if !chars.all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdError::InvalidCharacter);
        }

        Ok(ArchiveId(value.to_string()))
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline(always)]
    pub fn kind(&self) -> char {
        self.0.as_bytes()[0] as char
    }

    #[inline(always)]
    pub fn shard(&self) -> &str {
        &self.0[1..3]
    }

    /// Sub-path of the committed file relative to the archive prefix.
    pub fn shard_path(&self) -> PathBuf {
        Path::new(self.shard()).join(&self.0)
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArchiveId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Split the last segment of a URL path into an id and an optional extension.
///
/// Everything after the first `.` is the extension, so `/x/a01000001.tar.gz`
/// yields `a01000001` and `tar.gz`. Query strings are ignored.
pub fn id_from_url_path(path: &str) -> Result<(ArchiveId, Option<String>), IdError> {
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    let path = RelativePath::new(path.trim_start_matches('/'));
    let name = path.file_name().ok_or(IdError::EmptyPath)?;

    let (id, extension) = match name.find('.') {
        Some(pos) => (&name[..pos], Some(&name[pos + 1..])),
        None => (name, None),
    };

    let extension = extension.filter(|x| !x.is_empty()).map(str::to_string);
    Ok((ArchiveId::new(id)?, extension))
}

/// Source of fresh ids for uploads that did not reserve one.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, kind: char) -> ArchiveId;
}

/// Process-local counter; the shard is the counter modulo 100.
#[derive(Debug)]
pub struct SequenceGenerator {
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub fn new(seed: u64) -> SequenceGenerator {
        SequenceGenerator {
            counter: AtomicU64::new(seed),
        }
    }

    /// Seed from the wall clock so restarted processes rarely collide.
    pub fn from_clock() -> SequenceGenerator {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        SequenceGenerator::new(seed)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        SequenceGenerator::from_clock()
    }
}

impl IdGenerator for SequenceGenerator {
    fn next_id(&self, kind: char) -> ArchiveId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        ArchiveId(format!(
            "{}{:02}{:0width$}",
            kind,
            n % 100,
            n,
            width = COUNTER_WIDTH
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_paths() {
        let (id, ext) = id_from_url_path("/a01000001").unwrap();
        assert_eq!(id.as_str(), "a01000001");
        assert_eq!(ext, None);

        let (id, ext) = id_from_url_path("/cdn/b42000017.png?download=1").unwrap();
        assert_eq!(id.as_str(), "b42000017");
        assert_eq!(id.kind(), 'b');
        assert_eq!(id.shard(), "42");
        assert_eq!(ext.as_deref(), Some("png"));

        let (_, ext) = id_from_url_path("a01000001.tar.gz").unwrap();
        assert_eq!(ext.as_deref(), Some("tar.gz"));
    }

    #[test]
    fn rejects_bad_ids() {
        assert_eq!(id_from_url_path("/").unwrap_err(), IdError::EmptyPath);
        assert_eq!(ArchiveId::new("A01000001").unwrap_err(), IdError::InvalidKind);
        assert_eq!(ArchiveId::new("a01").unwrap_err(), IdError::TooShort);
        assert_eq!(
            ArchiveId::new("a01-..").unwrap_err(),
            IdError::InvalidCharacter
        );
    }

    #[test]
    fn shard_path_fans_out() {
        let id = ArchiveId::new("a17000123").unwrap();
        assert_eq!(id.shard_path(), Path::new("17").join("a17000123"));
    }

    #[test]
    fn sequence_ids_are_well_formed() {
        let ids = SequenceGenerator::new(1);
        let a = ids.next_id('a');
        let b = ids.next_id('a');
        assert_eq!(a.as_str(), "a01000001");
        assert_eq!(b.as_str(), "a02000002");
        assert!(ArchiveId::new(a.as_str()).is_ok());
    }
}
