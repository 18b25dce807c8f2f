use std::path::Path;

use cdn_archive::{Archive, ArchiveId, Config, Headers, Mode, SequenceGenerator, SidecarStore};
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Every entry id stored under `root`, sorted.
pub fn collect_ids(root: &Path) -> Result<Vec<String>> {
    let mut ids = vec![];

    if !root.exists() {
        return Ok(ids);
    }

    for entry in jwalk::WalkDir::new(root).skip_hidden(false) {
        let entry = entry.map_err(|source| Error::Walk {
            path: root.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if SidecarStore::is_sidecar(&path) {
            continue;
        }

        match path.file_name().and_then(|x| x.to_str()) {
            Some(name) if ArchiveId::new(name).is_ok() => ids.push(name.to_string()),
            _ => tracing::warn!(path = %path.display(), "skipping file with no archive id"),
        }
    }

    ids.sort();
    Ok(ids)
}

/// Validate one entry in a session of its own.
fn check(config: &Config, headers: &Headers, ids: &SequenceGenerator, id: &str) -> Result<()> {
    let mut archive =
        Archive::new(config, headers, ids).map_err(|source| Error::OpenSession { source })?;

    let entry = archive
        .open(id, |_| Mode::Validate)
        .map_err(|source| Error::OpenEntry {
            id: id.to_string(),
            source,
        })?;

    entry
        .validate(None, Some(entry.id().as_str()), None)
        .map_err(|source| Error::Validate {
            id: id.to_string(),
            source,
        })
}

pub fn run(config: &Config, headers: &Headers, ids: Vec<String>) -> Result<()> {
    let ids = if ids.is_empty() {
        collect_ids(&config.settings.archive_prefix)?
    } else {
        ids
    };

    let generator = SequenceGenerator::default();
    let failed = ids
        .par_iter()
        .map(|id| match check(config, headers, &generator, id) {
            Ok(()) => {
                println!("ok      {}", id);
                0
            }
            Err(e) => {
                match std::error::Error::source(&e) {
                    Some(cause) => println!("FAILED  {}: {}", id, cause),
                    None => println!("FAILED  {}: {}", id, e),
                }
                1
            }
        })
        .sum::<usize>();

    if failed > 0 {
        return Err(Error::ValidationFailed {
            failed,
            total: ids.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdn_archive::config::MetadataBackend;
    use cdn_archive::Attributes;
    use std::fs;

    #[test]
    fn collects_entry_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let shard = dir.path().join("01");
        fs::create_dir_all(&shard).unwrap();
        fs::write(shard.join("a01000001"), b"x").unwrap();
        fs::write(shard.join(".a01000001.xattrs"), b"{}").unwrap();
        fs::write(shard.join("README"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("02")).unwrap();
        fs::write(dir.path().join("02").join("a02000002"), b"x").unwrap();

        let ids = collect_ids(dir.path()).unwrap();
        assert_eq!(ids, vec!["a01000001", "a02000002"]);
    }

    #[test]
    fn corruption_is_reported_as_a_validation_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.settings.archive_prefix = dir.path().join("archive");
        config.settings.temporary_prefix = dir.path().join("tmp");
        config.settings.metadata = MetadataBackend::Sidecar;

        let headers = Headers::new();
        let ids = SequenceGenerator::default();
        {
            let mut archive = Archive::new(&config, &headers, &ids).unwrap();
            let mut upload = archive.create(None, Some("a01000001")).unwrap();
            upload.append(b"0123456789").unwrap();
            upload
                .close(&Attributes::new(), &Attributes::new())
                .unwrap()
                .commit()
                .unwrap();
        }

        check(&config, &headers, &ids, "a01000001").unwrap();

        fs::write(dir.path().join("archive/01/a01000001"), b"9876543210").unwrap();
        match check(&config, &headers, &ids, "a01000001") {
            Err(Error::Validate { id, source }) => {
                assert_eq!(id, "a01000001");
                assert_eq!(source.status(), 500);
            }
            other => panic!("expected a validation failure, got {:?}", other),
        }

        match check(&config, &headers, &ids, "a02000002") {
            Err(Error::OpenEntry { source, .. }) => assert_eq!(source.status(), 404),
            other => panic!("expected a missing entry, got {:?}", other),
        }
    }

    #[test]
    fn missing_archive_has_no_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect_ids(&dir.path().join("nope")).unwrap().is_empty());
    }
}
