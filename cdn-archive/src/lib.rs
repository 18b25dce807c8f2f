//! A file archive whose entries carry their metadata as extended attributes,
//! guarded by a small access control rule language.
//!
//! ```no_run
//! use cdn_archive::{Archive, Config, Headers, Mode, SequenceGenerator};
//!
//! # fn main() -> cdn_archive::Result<()> {
//! let config = Config::default();
//! let headers: Headers = vec![("X-CASPER-USER-ID", "1")].into_iter().collect();
//! let ids = SequenceGenerator::default();
//! let mut archive = Archive::new(&config, &headers, &ids)?;
//!
//! let mut upload = archive.create(Some(5), None)?;
//! upload.append(b"hello")?;
//! let attrs = Default::default();
//! let rinfo = upload.close(&attrs, &Default::default())?.commit()?;
//!
//! let entry = archive.open(rinfo.new_id.as_deref().unwrap_or(""), |_| Mode::Read)?;
//! let _content = entry.content()?;
//! # Ok(())
//! # }
//! ```

pub mod act;
pub mod archive;
pub mod attrs;
pub mod config;
mod error;
pub mod h2e;
pub mod hashing;
mod headers;
pub mod id;
pub mod meta;
pub mod registry;

pub use act::{Act, ActError};
pub use archive::{
    quarantine, Archive, Entry, Local, Mode, Operation, PendingCommit, RInfo, Replacement, Upload,
};
pub use attrs::Attributes;
pub use config::{Config, ConfigError, Settings};
pub use error::{Error, Result};
pub use h2e::H2EMap;
pub use headers::Headers;
pub use id::{id_from_url_path, ArchiveId, IdError, IdGenerator, SequenceGenerator};
pub use meta::{MetadataStore, NativeStore, SidecarStore, XAttr};
pub use registry::{commit_with, Registry, ReplicationQueue};
