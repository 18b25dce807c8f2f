use std::path::PathBuf;

use cdn_archive::{ActError, ConfigError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot load configuration `{}`", .path.display())]
    LoadConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Invalid header `{0}`, expected `Name: value`")]
    InvalidHeader(String),

    #[error("Cannot open archive session")]
    OpenSession {
        #[source]
        source: cdn_archive::Error,
    },

    #[error("Cannot open entry `{id}`")]
    OpenEntry {
        id: String,
        #[source]
        source: cdn_archive::Error,
    },

    #[error("Entry `{id}` failed validation")]
    Validate {
        id: String,
        #[source]
        source: cdn_archive::Error,
    },

    #[error("Cannot walk directory `{}`", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: jwalk::Error,
    },

    #[error("{failed} of {total} entries failed validation")]
    ValidationFailed { failed: usize, total: usize },

    #[error("Cannot evaluate rules")]
    Evaluate {
        #[source]
        source: ActError,
    },

    #[error("Cannot purge quarantine")]
    Purge {
        #[source]
        source: cdn_archive::Error,
    },

    #[error("Cannot recover `{id}`")]
    Recover {
        id: String,
        #[source]
        source: cdn_archive::Error,
    },
}
