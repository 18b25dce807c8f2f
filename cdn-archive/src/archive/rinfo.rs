use serde::Serialize;
use serde_json::{Map, Value};

use super::Local;
use crate::h2e::ResponseAttr;

/// What an operation reports back: where the entry was, where it is now, and
/// the attributes worth echoing to the client.
///
/// Deletions report the post-operation location (the quarantine copy, or the
/// removed path) under `new_*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RInfo {
    pub old_id: Option<String>,
    pub old_uri: Option<String>,
    pub new_id: Option<String>,
    pub new_uri: Option<String>,
    pub attrs: Vec<ResponseAttr>,
}

impl RInfo {
    pub(crate) fn between(old: Option<&Local>, new: Option<&Local>) -> RInfo {
        RInfo {
            old_id: old.map(|x| x.id.to_string()),
            old_uri: old.map(|x| x.uri.clone()),
            new_id: new.map(|x| x.id.to_string()),
            new_uri: new.map(|x| x.uri.clone()),
            attrs: vec![],
        }
    }

    pub(crate) fn with_attrs(mut self, attrs: Vec<ResponseAttr>) -> RInfo {
        self.attrs = attrs;
        self
    }

    /// Response attribute for attribute name `key`.
    pub fn attr(&self, key: &str) -> Option<&ResponseAttr> {
        self.attrs.iter().find(|x| x.key == key)
    }

    /// Serializable attributes as a JSON object keyed by header name, each
    /// value typed per its mapping.
    pub fn to_json(&self) -> Value {
        let map = self
            .attrs
            .iter()
            .filter(|x| x.serialize)
            .map(|x| (x.name.clone(), x.json_type.to_json(&x.value)))
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2e::JsonType;

    #[test]
    fn json_skips_unserialized_attributes() {
        let rinfo = RInfo {
            new_id: Some("a01000001".into()),
            attrs: vec![
                ResponseAttr {
                    name: "X-CASPER-CONTENT-LENGTH".into(),
                    key: "content-length".into(),
                    json_type: JsonType::Number,
                    value: "10".into(),
                    serialize: true,
                },
                ResponseAttr {
                    name: "X-CASPER-BILLING-ID".into(),
                    key: "billing.id".into(),
                    json_type: JsonType::String,
                    value: "7".into(),
                    serialize: false,
                },
            ],
            ..RInfo::default()
        };

        assert_eq!(
            rinfo.to_json(),
            serde_json::json!({ "X-CASPER-CONTENT-LENGTH": 10 })
        );
        assert_eq!(rinfo.attr("billing.id").map(|x| x.value.as_str()), Some("7"));
    }
}
