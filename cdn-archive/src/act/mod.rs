//! The access control tree: a small rule language over numeric request
//! variables.
//!
//! Rules are written as statements, one per access right:
//!
//! ```text
//! r = 1
//! w = user_id = owner_id || (role & 0x4) != 0
//! d = 0
//! ```
//!
//! [`Tree`] compiles them into canonical text such as
//! `RelationalEqual(user_id,owner_id)`, which is what gets stored and what
//! [`evaluator::evaluate`] runs. [`Act`] binds the variables a deployment
//! declares to the live request headers.

use std::collections::BTreeMap;

use crate::attrs::Attributes;
use crate::config::{ActConfig, VariableDef};
use crate::headers::Headers;

pub mod evaluator;
pub mod parser;
pub mod scanner;
pub mod tree;
pub mod variable;

pub use self::tree::{Node, NodeId, Operator, Tree};
pub use self::variable::{Fallback, Hex, Numeric, Source, ValueKind, Variable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActError {
    #[error("variable `{0}` is not defined")]
    UndefinedVariable(String),

    #[error("variable `{0}` has no value")]
    UnboundVariable(String),

    #[error("unsupported variable kind `{0}`")]
    UnsupportedVariableKind(String),

    #[error("variable `{variable}` requires header {header}")]
    MissingHeader { variable: String, header: String },

    #[error("variable `{variable}` requires attribute `{attribute}`")]
    MissingAttribute { variable: String, attribute: String },

    #[error("variable `{variable}` cannot hold `{value}`")]
    InvalidValue { variable: String, value: String },

    #[error("variable `{variable}` is misconfigured: {reason}")]
    InvalidDefinition { variable: String, reason: String },

    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("malformed expression: {0}")]
    Malformed(String),

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("rule `{0}` refers to an undefined node")]
    UndefinedNode(String),

    #[error("no compiled rule named `{0}`")]
    UnknownRoot(String),
}

/// Compile `text` into canonical rule text per root, without binding any
/// variables.
pub fn compile_rules(text: &str) -> Result<BTreeMap<String, String>, ActError> {
    let mut out = BTreeMap::new();
    Tree::new().compile(text, |root, serialized| {
        out.insert(root.to_string(), serialized.to_string());
    })?;
    Ok(out)
}

#[derive(Debug)]
enum Binding {
    Numeric(Variable<Numeric>),
    Hex(Variable<Hex>),
}

impl Binding {
    fn new(kind: &str, def: &VariableDef) -> Result<Binding, ActError> {
        if kind == Numeric::NAME {
            Variable::from_def(def).map(Binding::Numeric)
        } else if kind == Hex::NAME {
            Variable::from_def(def).map(Binding::Hex)
        } else {
            Err(ActError::UnsupportedVariableKind(kind.to_string()))
        }
    }

    fn value(&self) -> Option<u64> {
        match self {
            Binding::Numeric(v) => v.value(),
            Binding::Hex(v) => v.value(),
        }
    }

    fn bind_headers(&mut self, headers: &Headers) -> Result<(), ActError> {
        match self {
            Binding::Numeric(v) => v.bind_headers(headers),
            Binding::Hex(v) => v.bind_headers(headers),
        }
    }

    fn bind_attributes(&mut self, attrs: &Attributes) -> Result<(), ActError> {
        match self {
            Binding::Numeric(v) => v.bind_attributes(attrs),
            Binding::Hex(v) => v.bind_attributes(attrs),
        }
    }
}

/// Binds declared variables to one request's headers and evaluates rules
/// against them.
///
/// Nothing is bound until [`Act::setup`] runs, so every evaluation before it
/// fails with [`ActError::UndefinedVariable`].
#[derive(Debug)]
pub struct Act<'a> {
    config: &'a ActConfig,
    headers: &'a Headers,
    tree: Tree,
    variables: BTreeMap<String, Binding>,
    compiled: BTreeMap<String, String>,
}

impl<'a> Act<'a> {
    pub fn new(config: &'a ActConfig, headers: &'a Headers) -> Act<'a> {
        Act {
            config,
            headers,
            tree: Tree::new(),
            variables: BTreeMap::new(),
            compiled: BTreeMap::new(),
        }
    }

    /// Declare every configured variable and bind it from the headers,
    /// replacing any earlier bindings.
    pub fn setup(&mut self) -> Result<(), ActError> {
        self.variables.clear();

        for (kind, defs) in self.config.variables.iter() {
            for def in defs.iter() {
                let mut binding = Binding::new(kind, def)?;
                binding.bind_headers(self.headers)?;

                if self.variables.insert(def.name.clone(), binding).is_some() {
                    return Err(ActError::InvalidDefinition {
                        variable: def.name.clone(),
                        reason: "declared more than once".into(),
                    });
                }
            }
        }

        tracing::debug!(variables = self.variables.len(), "access control variables bound");
        Ok(())
    }

    /// Bind attribute-sourced variables from an opened entry.
    pub fn bind_attributes(&mut self, attrs: &Attributes) -> Result<(), ActError> {
        for binding in self.variables.values_mut() {
            binding.bind_attributes(attrs)?;
        }
        Ok(())
    }

    /// Compile `text`, keeping each root's canonical form for
    /// [`Act::evaluate_root`] and handing it to `callback`.
    pub fn compile<F>(&mut self, text: &str, mut callback: F) -> Result<(), ActError>
    where
        F: FnMut(&str, &str),
    {
        self.compiled.clear();
        let compiled = &mut self.compiled;

        self.tree.compile(text, |root, serialized| {
            compiled.insert(root.to_string(), serialized.to_string());
            callback(root, serialized);
        })
    }

    /// Evaluate canonical rule text against the bound variables.
    pub fn evaluate(&self, text: &str) -> Result<u64, ActError> {
        evaluator::evaluate(text, |name| self.resolve(name))
    }

    /// Evaluate a root kept by the last [`Act::compile`].
    pub fn evaluate_root(&self, root: &str) -> Result<u64, ActError> {
        let text = self
            .compiled
            .get(root)
            .ok_or_else(|| ActError::UnknownRoot(root.to_string()))?;
        self.evaluate(text)
    }

    pub fn compiled(&self) -> &BTreeMap<String, String> {
        &self.compiled
    }

    pub fn variable(&self, name: &str) -> Option<u64> {
        self.variables.get(name).and_then(Binding::value)
    }

    fn resolve(&self, name: &str) -> Result<u64, ActError> {
        let binding = self
            .variables
            .get(name)
            .ok_or_else(|| ActError::UndefinedVariable(name.to_string()))?;
        binding
            .value()
            .ok_or_else(|| ActError::UnboundVariable(name.to_string()))
    }
}
