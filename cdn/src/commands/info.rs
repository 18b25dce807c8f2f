use cdn_archive::{attrs, Archive, Config, Headers, Mode, SequenceGenerator};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

#[inline(always)]
fn format_size(len: u64) -> String {
    use humansize::{file_size_opts as options, FileSize};
    len.file_size(options::BINARY)
        .unwrap_or_else(|_| format!("{} B", len))
}

/// `2024-03-01T10:00:00+00:00 (12 days ago)`, or the raw value if it is not
/// a timestamp.
fn format_time(raw: &str, now: DateTime<Utc>) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => {
            let days = now.signed_duration_since(at.with_timezone(&Utc)).num_days();
            format!("{} ({} days ago)", raw, days)
        }
        Err(_) => raw.to_string(),
    }
}

pub fn run(config: &Config, headers: &Headers, target: &str) -> Result<()> {
    let ids = SequenceGenerator::default();
    let mut archive =
        Archive::new(config, headers, &ids).map_err(|source| Error::OpenSession { source })?;

    let entry = archive
        .open(target, |_| Mode::NotSet)
        .map_err(|source| Error::OpenEntry {
            id: target.to_string(),
            source,
        })?;

    let local = entry.local();
    let now = Utc::now();

    println!("Id:        {}", local.id);
    println!("Path:      {}", local.path.display());
    println!("Size:      {} ({} bytes)", format_size(local.size), local.size);
    if let Some(filename) = &local.filename {
        println!("Filename:  {}", filename);
    }
    if let Some(at) = entry.attributes().get(attrs::ARCHIVED_AT) {
        println!("Archived:  {}", format_time(at, now));
    }
    println!();

    for (name, value) in entry.attributes().iter() {
        println!("{}{} = {}", config.settings.xattr_prefix, name, value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn times_render_with_age() {
        let now = Utc.ymd(2024, 3, 13).and_hms(10, 0, 0);
        assert_eq!(
            format_time("2024-03-01T10:00:00+00:00", now),
            "2024-03-01T10:00:00+00:00 (12 days ago)"
        );
        assert_eq!(format_time("yesterday", now), "yesterday");
    }

    #[test]
    fn sizes_are_binary() {
        assert_eq!(format_size(2048), "2 KiB");
    }
}
