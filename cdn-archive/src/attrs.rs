//! Well-known attribute names for archive entries.
//!
//! Names are relative to the configured xattr prefix (`archive.` by default),
//! so [`CONTENT_LENGTH`] is stored as `archive.content-length`.

use std::collections::BTreeMap;

/// Attribute map keyed by relative attribute name.
pub type Attributes = BTreeMap<String, String>;

// Identity
/// Archive id of the entry
pub const ID: &str = "id";
/// Name of the header a caller may use to re-bind a custom id
pub const XHVN: &str = "xhvn";
/// Original filename supplied by the uploader
pub const FILENAME: &str = "filename";

// Content
pub const CONTENT_TYPE: &str = "content-type";
/// Decimal byte count of the stored content
pub const CONTENT_LENGTH: &str = "content-length";
/// Lowercase hex MD5 of the stored content
pub const MD5: &str = "md5";

// Provenance
/// Identity of the process that wrote the entry
pub const ARCHIVIST: &str = "archivist";
pub const ARCHIVED_BY: &str = "archived.by";
pub const ARCHIVED_AT: &str = "archived.at";
pub const CREATED_BY: &str = "created.by";
pub const CREATED_AT: &str = "created.at";
pub const MODIFIED_BY: &str = "modified.by";
pub const MODIFIED_AT: &str = "modified.at";
pub const XATTRS_CREATED_BY: &str = "xattrs.created.by";
pub const XATTRS_CREATED_AT: &str = "xattrs.created.at";
pub const XATTRS_MODIFIED_BY: &str = "xattrs.modified.by";
pub const XATTRS_MODIFIED_AT: &str = "xattrs.modified.at";

// Billing
pub const BILLING_ID: &str = "billing.id";
pub const BILLING_TYPE: &str = "billing.type";

// Permissions
/// Human-readable access rules, as written by the uploader
pub const PERMISSIONS_HR: &str = "permissions.hr";
/// Prefix of the compiled per-right rules (`permissions.ast.r` etc.)
pub const PERMISSIONS_AST_PREFIX: &str = "permissions.ast.";

// Audit
/// JSON array of `{operation, by, at, requestee}`
pub const REPLICATION_DATA: &str = "replication.data";
/// Unix seconds after which a quarantined entry may be purged
pub const QUARANTINE_EXPIRES_AT: &str = "quarantine.expires-at";

/// The access rights every entry carries a compiled rule for.
pub const RIGHTS: &[&str] = &["r", "w", "d"];

/// Relative name of the compiled rule for `right`.
pub fn permission_key(right: &str) -> String {
    format!("{}{}", PERMISSIONS_AST_PREFIX, right)
}

/// Attributes that must be present on every committed entry.
pub fn mandatory() -> Vec<String> {
    let mut out: Vec<String> = vec![
        ID,
        CONTENT_TYPE,
        CONTENT_LENGTH,
        MD5,
        ARCHIVIST,
        ARCHIVED_BY,
        ARCHIVED_AT,
        CREATED_BY,
        CREATED_AT,
        BILLING_ID,
        BILLING_TYPE,
        PERMISSIONS_HR,
    ]
    .into_iter()
    .map(String::from)
    .collect();
    out.extend(RIGHTS.iter().map(|r| permission_key(r)));
    out
}

/// Attributes the archive maintains itself; callers cannot overwrite them
/// through a patch or an update.
pub fn is_protected(name: &str) -> bool {
    matches!(
        name,
        ID | MD5
            | CONTENT_LENGTH
            | ARCHIVIST
            | CREATED_BY
            | CREATED_AT
            | XATTRS_CREATED_BY
            | XATTRS_CREATED_AT
            | REPLICATION_DATA
            | QUARANTINE_EXPIRES_AT
    ) || name.starts_with(PERMISSIONS_AST_PREFIX)
}
