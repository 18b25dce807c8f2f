//! Process-wide configuration, loaded once at startup and shared read-only by
//! every [`Archive`](crate::Archive).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attrs;
use crate::h2e::{H2EEntry, H2EMap, JsonType};
use crate::meta::{MetadataStore, NativeStore, SidecarStore};

static NATIVE: NativeStore = NativeStore;
static SIDECAR: SidecarStore = SidecarStore;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub h2e: H2EMap,
    pub act: ActConfig,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.settings;

        if s.archive_prefix.as_os_str().is_empty() || s.temporary_prefix.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "archive_prefix and temporary_prefix are required".into(),
            ));
        }

        if !s.id_type.is_ascii_lowercase() {
            return Err(ConfigError::Invalid(format!(
                "id_type must be a lowercase ascii letter, not `{}`",
                s.id_type
            )));
        }

        if let Some(q) = &s.quarantine {
            if q.directory_prefix.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "quarantine.directory_prefix is required".into(),
                ));
            }
        }

        for entry in self.h2e.iter() {
            if entry.header.is_empty() || entry.xattr.is_empty() {
                return Err(ConfigError::Invalid(
                    "h2e entries need both a header and an xattr".into(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of committed entries, fanned out by shard.
    pub archive_prefix: PathBuf,
    /// Where uploads are written before they are committed.
    pub temporary_prefix: PathBuf,
    /// Where previous versions go when a backup is requested.
    pub backup_prefix: Option<PathBuf>,
    /// Staging root that move sources are resolved against.
    pub moves_prefix: Option<PathBuf>,
    pub quarantine: Option<Quarantine>,
    /// Identity of this writer, stored as `archive.archivist`.
    pub archivist: String,
    /// Type letter of generated ids.
    pub id_type: char,
    pub metadata: MetadataBackend,
    pub xattr_prefix: String,
    /// Header naming the user a request acts for.
    pub requester_header: String,
    /// Rules used when an upload carries no `permissions.hr`.
    pub default_permissions: String,
    /// Attributes skipped when validating against an expected set.
    pub non_validated: Vec<String>,
    pub billing: BillingDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            archive_prefix: PathBuf::from("/var/cdn/archive"),
            temporary_prefix: PathBuf::from("/var/cdn/tmp"),
            backup_prefix: None,
            moves_prefix: None,
            quarantine: None,
            archivist: "cdn".into(),
            id_type: 'a',
            metadata: MetadataBackend::default(),
            xattr_prefix: "archive.".into(),
            requester_header: "X-CASPER-USER-ID".into(),
            default_permissions: "r = 1; w = 1; d = 1".into(),
            non_validated: vec![
                attrs::REPLICATION_DATA.into(),
                attrs::MODIFIED_BY.into(),
                attrs::MODIFIED_AT.into(),
                attrs::XATTRS_MODIFIED_BY.into(),
                attrs::XATTRS_MODIFIED_AT.into(),
                attrs::QUARANTINE_EXPIRES_AT.into(),
            ],
            billing: BillingDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quarantine {
    pub directory_prefix: PathBuf,
    /// Seconds a quarantined entry is kept before it may be purged.
    #[serde(default = "Quarantine::default_validity")]
    pub validity: u64,
}

impl Quarantine {
    fn default_validity() -> u64 {
        7 * 24 * 60 * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    Xattr,
    Sidecar,
}

impl Default for MetadataBackend {
    fn default() -> Self {
        MetadataBackend::Xattr
    }
}

impl MetadataBackend {
    pub fn store(self) -> &'static dyn MetadataStore {
        match self {
            MetadataBackend::Xattr => &NATIVE,
            MetadataBackend::Sidecar => &SIDECAR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingDefaults {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for BillingDefaults {
    fn default() -> Self {
        BillingDefaults {
            id: "0".into(),
            kind: "none".into(),
        }
    }
}

/// Variable declarations for the access control tree, keyed by kind
/// (`numeric` or `hex`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActConfig {
    pub variables: BTreeMap<String, Vec<VariableDef>>,
}

impl Default for ActConfig {
    fn default() -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(
            "numeric".to_string(),
            vec![VariableDef {
                name: "user_id".into(),
                header: Some(HeaderNames::One("X-CASPER-USER-ID".into())),
                xattr: None,
                default: Some(serde_json::Value::from(0)),
            }],
        );
        ActConfig { variables }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderNames>,
    /// Bind from the opened entry's attribute instead of a header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xattr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// One header name, or several tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderNames {
    One(String),
    Many(Vec<String>),
}

impl HeaderNames {
    pub fn names(&self) -> Vec<String> {
        match self {
            HeaderNames::One(x) => vec![x.clone()],
            HeaderNames::Many(x) => x.clone(),
        }
    }
}

impl Default for H2EMap {
    fn default() -> Self {
        let entry = |header: &str, xattr: &str, json_type| H2EEntry {
            header: header.into(),
            xattr: xattr.into(),
            json_type,
            serialize: true,
        };

        H2EMap::new(vec![
            entry("Content-Type", attrs::CONTENT_TYPE, JsonType::String),
            entry("X-CASPER-FILENAME", attrs::FILENAME, JsonType::String),
            entry("X-CASPER-CONTENT-LENGTH", attrs::CONTENT_LENGTH, JsonType::Number),
            entry("X-CASPER-MD5", attrs::MD5, JsonType::String),
            entry("X-CASPER-BILLING-ID", attrs::BILLING_ID, JsonType::String),
            entry("X-CASPER-BILLING-TYPE", attrs::BILLING_TYPE, JsonType::String),
            entry("X-CASPER-PERMISSIONS", attrs::PERMISSIONS_HR, JsonType::String),
            entry("X-CASPER-ARCHIVED-BY", attrs::ARCHIVED_BY, JsonType::String),
            entry("X-CASPER-REPLICATION", attrs::REPLICATION_DATA, JsonType::Object),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.settings.xattr_prefix, "archive.");
        assert_eq!(config.settings.id_type, 'a');
        assert_eq!(config.settings.metadata, MetadataBackend::Xattr);
        assert!(config.settings.quarantine.is_none());
        assert!(config.act.variables.contains_key("numeric"));
        assert!(config.h2e.iter().any(|e| e.xattr == "content-type"));
    }

    #[test]
    fn parses_full_document() {
        let config = Config::from_json(
            r#"{
                "settings": {
                    "archive_prefix": "/srv/archive",
                    "temporary_prefix": "/srv/tmp",
                    "quarantine": { "directory_prefix": "/srv/quarantine", "validity": 60 },
                    "metadata": "sidecar",
                    "billing": { "id": "7", "type": "internal" }
                },
                "h2e": [
                    { "header": "Content-Type", "xattr": "content-type" },
                    { "header": "X-Size", "xattr": "content-length", "type": "number", "serialize": true }
                ],
                "act": {
                    "variables": {
                        "numeric": [ { "name": "user_id", "header": "X-CASPER-USER-ID" } ],
                        "hex": [ { "name": "role", "header": ["X-ROLE", "X-CASPER-ROLE"], "default": "0x0" } ]
                    }
                }
            }"#,
        )
        .unwrap();

        let s = &config.settings;
        assert_eq!(s.archive_prefix, Path::new("/srv/archive"));
        assert_eq!(s.quarantine.as_ref().map(|q| q.validity), Some(60));
        assert_eq!(s.metadata, MetadataBackend::Sidecar);
        assert_eq!(s.billing.kind, "internal");

        let entries = config.h2e.iter().collect::<Vec<_>>();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].json_type, JsonType::String);
        assert!(!entries[0].serialize);

        let hex = &config.act.variables["hex"][0];
        assert_eq!(
            hex.header,
            Some(HeaderNames::Many(vec!["X-ROLE".into(), "X-CASPER-ROLE".into()]))
        );
    }

    #[test]
    fn rejects_bad_settings() {
        let err = Config::from_json(r#"{"settings": {"id_type": "A"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_json(r#"{"settings": {"archive_prefix": ""}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_json("[").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
