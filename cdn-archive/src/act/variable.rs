use std::fmt;
use std::marker::PhantomData;

use serde_json::Value;

use super::ActError;
use crate::attrs::Attributes;
use crate::config::VariableDef;
use crate::headers::Headers;

/// How a variable's raw text becomes a value.
pub trait ValueKind {
    /// Kind name as used in the `variables` configuration object.
    const NAME: &'static str;

    fn parse(raw: &str) -> Option<u64>;

    fn from_json(value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

/// Decimal integers.
#[derive(Debug, Clone, Copy)]
pub struct Numeric;

impl ValueKind for Numeric {
    const NAME: &'static str = "numeric";

    fn parse(raw: &str) -> Option<u64> {
        raw.trim().parse::<u64>().ok()
    }
}

/// Hexadecimal integers, with or without a `0x` prefix.
#[derive(Debug, Clone, Copy)]
pub struct Hex;

impl ValueKind for Hex {
    const NAME: &'static str = "hex";

    fn parse(raw: &str) -> Option<u64> {
        let raw = raw.trim();
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        u64::from_str_radix(digits, 16).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Header names tried in order; the first present wins.
    Headers(Vec<String>),
    /// Attribute of the opened entry, relative to the xattr prefix.
    XAttr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Default(u64),
    Required,
}

pub struct Variable<K> {
    name: String,
    source: Source,
    fallback: Fallback,
    value: Option<u64>,
    _kind: PhantomData<K>,
}

impl<K: ValueKind> Variable<K> {
    pub fn new<S: Into<String>>(name: S, source: Source, fallback: Fallback) -> Self {
        Variable {
            name: name.into(),
            source,
            fallback,
            value: None,
            _kind: PhantomData,
        }
    }

    pub fn from_def(def: &VariableDef) -> Result<Self, ActError> {
        let invalid = |reason: &str| ActError::InvalidDefinition {
            variable: def.name.clone(),
            reason: reason.to_string(),
        };

        if def.name.is_empty() {
            return Err(invalid("name is empty"));
        }

        let source = match (&def.header, &def.xattr) {
            (Some(header), None) => {
                let names = header.names();
                if names.is_empty() || names.iter().any(|x| x.is_empty()) {
                    return Err(invalid("header names must not be empty"));
                }
                Source::Headers(names)
            }
            (None, Some(xattr)) if !xattr.is_empty() => Source::XAttr(xattr.clone()),
            _ => return Err(invalid("exactly one of `header` or `xattr` is required")),
        };

        let fallback = match &def.default {
            None => Fallback::Required,
            Some(value) => K::from_json(value)
                .map(Fallback::Default)
                .ok_or_else(|| invalid(&format!("default is not a {} value", K::NAME)))?,
        };

        Ok(Variable::new(def.name.clone(), source, fallback))
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn value(&self) -> Option<u64> {
        self.value
    }

    fn accept(&mut self, raw: &str) -> Result<(), ActError> {
        match K::parse(raw) {
            Some(v) => {
                self.value = Some(v);
                Ok(())
            }
            None => Err(ActError::InvalidValue {
                variable: self.name.clone(),
                value: raw.to_string(),
            }),
        }
    }

    /// Refresh from the request headers. Attribute-sourced variables only
    /// take their default here.
    pub fn bind_headers(&mut self, headers: &Headers) -> Result<(), ActError> {
        self.value = None;

        let names = match &self.source {
            Source::Headers(names) => names.clone(),
            Source::XAttr(_) => {
                if let Fallback::Default(v) = self.fallback {
                    self.value = Some(v);
                }
                return Ok(());
            }
        };

        if let Some(raw) = names.iter().find_map(|name| headers.get(name)) {
            return self.accept(raw);
        }

        match self.fallback {
            Fallback::Default(v) => {
                self.value = Some(v);
                Ok(())
            }
            Fallback::Required => Err(ActError::MissingHeader {
                variable: self.name.clone(),
                header: names.join(", "),
            }),
        }
    }

    /// Refresh from an opened entry's attributes. Header-sourced variables
    /// are left alone.
    pub fn bind_attributes(&mut self, attrs: &Attributes) -> Result<(), ActError> {
        let key = match &self.source {
            Source::XAttr(key) => key.clone(),
            Source::Headers(_) => return Ok(()),
        };

        self.value = None;

        if let Some(raw) = attrs.get(&key) {
            return self.accept(raw);
        }

        match self.fallback {
            Fallback::Default(v) => {
                self.value = Some(v);
                Ok(())
            }
            Fallback::Required => Err(ActError::MissingAttribute {
                variable: self.name.clone(),
                attribute: key,
            }),
        }
    }
}

impl<K: ValueKind> fmt::Debug for Variable<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("kind", &K::NAME)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("fallback", &self.fallback)
            .field("value", &self.value)
            .finish()
    }
}
