//! Header-to-xattr mapping.
//!
//! Each entry ties a request header to an attribute name. Inbound, headers
//! are collected into attributes for a close, patch, update or move;
//! outbound, stored attributes are turned into response attributes.

use serde::{Deserialize, Serialize};

use crate::attrs::Attributes;
use crate::error::{Error, Result};
use crate::headers::Headers;

/// How a value is rendered in [`RInfo::to_json`](crate::RInfo::to_json).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Boolean,
    Object,
}

impl Default for JsonType {
    fn default() -> Self {
        JsonType::String
    }
}

impl JsonType {
    /// Render `raw` as this type, falling back to a JSON string.
    pub fn to_json(self, raw: &str) -> serde_json::Value {
        use serde_json::Value;

        match self {
            JsonType::String => Value::String(raw.into()),
            JsonType::Number => raw
                .parse::<u64>()
                .map(Value::from)
                .or_else(|_| raw.parse::<i64>().map(Value::from))
                .or_else(|_| raw.parse::<f64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(raw.into())),
            JsonType::Boolean => match raw {
                "1" | "true" => Value::Bool(true),
                "0" | "false" => Value::Bool(false),
                _ => Value::String(raw.into()),
            },
            JsonType::Object => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into()))
            }
        }
    }

    fn accepts(self, raw: &str) -> bool {
        match self {
            JsonType::String => true,
            JsonType::Number => raw.parse::<f64>().is_ok(),
            JsonType::Boolean => matches!(raw, "1" | "0" | "true" | "false"),
            JsonType::Object => serde_json::from_str::<serde_json::Value>(raw).is_ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct H2EEntry {
    pub header: String,
    /// Attribute name relative to the xattr prefix.
    pub xattr: String,
    #[serde(rename = "type", default)]
    pub json_type: JsonType,
    /// Whether the value is included in serialized responses.
    #[serde(default)]
    pub serialize: bool,
}

/// An attribute as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseAttr {
    /// Header name the value travels under.
    pub name: String,
    /// Attribute name.
    pub key: String,
    pub json_type: JsonType,
    pub value: String,
    pub serialize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct H2EMap(Vec<H2EEntry>);

impl H2EMap {
    pub fn new(entries: Vec<H2EEntry>) -> H2EMap {
        H2EMap(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &H2EEntry> {
        self.0.iter()
    }

    pub fn by_xattr(&self, xattr: &str) -> Option<&H2EEntry> {
        self.0.iter().find(|e| e.xattr == xattr)
    }

    /// Attributes carried by `headers`. A value that does not fit its
    /// declared type is a bad request.
    pub fn collect(&self, headers: &Headers) -> Result<Attributes> {
        let mut out = Attributes::new();
        for entry in self.0.iter() {
            if let Some(value) = headers.get(&entry.header) {
                if !entry.json_type.accepts(value) {
                    return Err(Error::BadRequest(format!(
                        "header `{}` must hold a {:?} value",
                        entry.header, entry.json_type
                    )));
                }
                out.insert(entry.xattr.clone(), value.to_string());
            }
        }
        Ok(out)
    }

    /// Response attributes for every mapped attribute present in `attrs`.
    pub fn response(&self, attrs: &Attributes) -> Vec<ResponseAttr> {
        self.0
            .iter()
            .filter_map(|entry| {
                attrs.get(&entry.xattr).map(|value| ResponseAttr {
                    name: entry.header.clone(),
                    key: entry.xattr.clone(),
                    json_type: entry.json_type,
                    value: value.clone(),
                    serialize: entry.serialize,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> H2EMap {
        H2EMap::new(vec![
            H2EEntry {
                header: "Content-Type".into(),
                xattr: "content-type".into(),
                json_type: JsonType::String,
                serialize: true,
            },
            H2EEntry {
                header: "X-Size".into(),
                xattr: "content-length".into(),
                json_type: JsonType::Number,
                serialize: true,
            },
            H2EEntry {
                header: "X-Secret".into(),
                xattr: "billing.id".into(),
                json_type: JsonType::String,
                serialize: false,
            },
        ])
    }

    #[test]
    fn collects_mapped_headers() {
        let headers: Headers = vec![("content-type", "text/plain"), ("X-Other", "1")]
            .into_iter()
            .collect();
        let attrs = map().collect(&headers).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs["content-type"], "text/plain");
    }

    #[test]
    fn rejects_mistyped_headers() {
        let headers: Headers = vec![("X-Size", "ten")].into_iter().collect();
        let err = map().collect(&headers).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn builds_response_attributes() {
        let mut attrs = Attributes::new();
        attrs.insert("content-length".into(), "10".into());
        attrs.insert("billing.id".into(), "7".into());
        attrs.insert("md5".into(), "x".into());

        let out = map().response(&attrs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "X-Size");
        assert_eq!(out[0].json_type.to_json(&out[0].value), serde_json::json!(10));
        assert!(!out[1].serialize);
    }

    #[test]
    fn json_rendering() {
        assert_eq!(JsonType::Boolean.to_json("1"), serde_json::json!(true));
        assert_eq!(JsonType::Number.to_json("-3"), serde_json::json!(-3));
        assert_eq!(JsonType::Number.to_json("n/a"), serde_json::json!("n/a"));
        assert_eq!(
            JsonType::Object.to_json(r#"[{"operation":"create"}]"#),
            serde_json::json!([{"operation": "create"}])
        );
    }
}
