use cdn_archive::{quarantine, Archive, Config, Headers, SequenceGenerator};
use chrono::{SecondsFormat, Utc};

use crate::error::{Error, Result};

pub fn purge(config: &Config) -> Result<()> {
    let now = Utc::now();
    let purged = quarantine::purge(config, now).map_err(|source| Error::Purge { source })?;

    println!(
        "Purged {} entries expired as of {}",
        purged.len(),
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    for id in purged {
        println!("  {}", id);
    }

    Ok(())
}

pub fn recover(config: &Config, headers: &Headers, id: &str) -> Result<()> {
    let ids = SequenceGenerator::default();
    let mut archive =
        Archive::new(config, headers, &ids).map_err(|source| Error::OpenSession { source })?;

    let rinfo = archive
        .recover(id)
        .and_then(|pending| pending.commit())
        .map_err(|source| Error::Recover {
            id: id.to_string(),
            source,
        })?;

    println!(
        "{} restored to {}",
        id,
        rinfo.new_uri.as_deref().unwrap_or("-")
    );
    Ok(())
}
