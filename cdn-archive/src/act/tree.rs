use std::collections::BTreeMap;
use std::fmt;

use super::{parser, ActError};

/// Index of a node inside the [`Tree`] that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[inline(always)]
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseAnd,
    RelationalEqual,
    RelationalNotEqual,
}

impl Operator {
    pub const ALL: &'static [Operator] = &[
        Operator::LogicalOr,
        Operator::LogicalAnd,
        Operator::BitwiseOr,
        Operator::BitwiseAnd,
        Operator::RelationalEqual,
        Operator::RelationalNotEqual,
    ];

    /// Name used in the canonical text form.
    pub const fn name(self) -> &'static str {
        use Operator::*;

        match self {
            LogicalOr => "LogicalOr",
            LogicalAnd => "LogicalAnd",
            BitwiseOr => "BitwiseOr",
            BitwiseAnd => "BitwiseAnd",
            RelationalEqual => "RelationalEqual",
            RelationalNotEqual => "RelationalNotEqual",
        }
    }

    pub fn from_name(name: &str) -> Option<Operator> {
        Operator::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Logical and relational operators yield 0 or 1; bitwise ones the raw word.
    pub fn apply(self, left: u64, right: u64) -> u64 {
        use Operator::*;

        match self {
            LogicalOr => ((left != 0) || (right != 0)) as u64,
            LogicalAnd => ((left != 0) && (right != 0)) as u64,
            BitwiseOr => left | right,
            BitwiseAnd => left & right,
            RelationalEqual => (left == right) as u64,
            RelationalNotEqual => (left != right) as u64,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Allocated but not yet filled in.
    Undefined,
    Expression {
        op: Operator,
        left: NodeId,
        right: NodeId,
    },
    /// Keeps the text it was written with, e.g. `0x1F`.
    Hex { value: u64, text: String },
    Number(u64),
    Variable(String),
}

/// Arena of expression nodes plus the named roots built from them.
///
/// Nodes live until the next [`Tree::clear`]; a root replaced by a later
/// [`Tree::push`] leaves its old subtree in the arena until then.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    roots: BTreeMap<String, NodeId>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }

    #[inline(always)]
    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Allocate a placeholder to be filled with [`Tree::define`].
    pub fn add(&mut self) -> NodeId {
        self.alloc(Node::Undefined)
    }

    pub fn add_value(&mut self, value: u64, is_hex: bool) -> NodeId {
        if is_hex {
            self.add_hex(value, format!("0x{:x}", value))
        } else {
            self.alloc(Node::Number(value))
        }
    }

    pub fn add_hex<S: Into<String>>(&mut self, value: u64, text: S) -> NodeId {
        self.alloc(Node::Hex {
            value,
            text: text.into(),
        })
    }

    pub fn add_variable<S: Into<String>>(&mut self, name: S) -> NodeId {
        self.alloc(Node::Variable(name.into()))
    }

    pub fn add_expression(&mut self, op: Operator, left: NodeId, right: NodeId) -> NodeId {
        debug_assert!(left.0 < self.nodes.len() && right.0 < self.nodes.len());
        self.alloc(Node::Expression { op, left, right })
    }

    /// Fill in a node allocated with [`Tree::add`].
    pub fn define(&mut self, id: NodeId, node: Node) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = node;
        }
    }

    pub fn push<S: Into<String>>(&mut self, root: S, node: NodeId) {
        self.roots.insert(root.into(), node);
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.roots.get(name).copied()
    }

    /// Root names in lexicographic order.
    pub fn roots(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.roots.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    /// Rebuild the tree from `text` and hand each root's canonical text to
    /// `callback`, in root name order.
    pub fn compile<F>(&mut self, text: &str, mut callback: F) -> Result<(), ActError>
    where
        F: FnMut(&str, &str),
    {
        self.clear();
        parser::parse(text, self)?;

        for (root, id) in self.roots.iter() {
            let serialized = self.serialize(*id).map_err(|e| match e {
                ActError::UndefinedNode(_) => ActError::UndefinedNode(root.clone()),
                other => other,
            })?;
            callback(root, &serialized);
        }

        Ok(())
    }

    /// Canonical text for the subtree at `id`: `op(left,right)` for
    /// expressions, the literal or name for leaves.
    pub fn serialize(&self, id: NodeId) -> Result<String, ActError> {
        let mut out = String::new();
        self.serialize_into(id, &mut out)?;
        Ok(out)
    }

    fn serialize_into(&self, id: NodeId, out: &mut String) -> Result<(), ActError> {
        match self.nodes.get(id.0) {
            Some(Node::Expression { op, left, right }) => {
                out.push_str(op.name());
                out.push('(');
                self.serialize_into(*left, out)?;
                out.push(',');
                self.serialize_into(*right, out)?;
                out.push(')');
            }
            Some(Node::Number(value)) => out.push_str(&value.to_string()),
            Some(Node::Hex { text, .. }) => out.push_str(text),
            Some(Node::Variable(name)) => out.push_str(name),
            Some(Node::Undefined) | None => {
                return Err(ActError::UndefinedNode(format!("#{}", id.0)))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_by_hand_built_tree() {
        let mut tree = Tree::new();
        let user = tree.add_variable("user_id");
        let one = tree.add_value(1, false);
        let eq = tree.add_expression(Operator::RelationalEqual, user, one);
        let mask = tree.add_value(255, true);
        let role = tree.add_variable("role");
        let and = tree.add_expression(Operator::BitwiseAnd, role, mask);
        let or = tree.add_expression(Operator::LogicalOr, eq, and);
        tree.push("r", or);

        assert_eq!(
            tree.serialize(or).unwrap(),
            "LogicalOr(RelationalEqual(user_id,1),BitwiseAnd(role,0xff))"
        );
    }

    #[test]
    fn last_push_wins() {
        let mut tree = Tree::new();
        let a = tree.add_value(1, false);
        let b = tree.add_value(2, false);
        tree.push("r", a);
        tree.push("r", b);

        assert_eq!(tree.root("r"), Some(b));
        assert_eq!(tree.roots().count(), 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn placeholders_must_be_defined() {
        let mut tree = Tree::new();
        let hole = tree.add();
        let one = tree.add_value(1, false);
        let eq = tree.add_expression(Operator::RelationalEqual, hole, one);

        assert!(matches!(tree.serialize(eq), Err(ActError::UndefinedNode(_))));

        tree.define(hole, Node::Variable("user_id".into()));
        assert_eq!(tree.serialize(eq).unwrap(), "RelationalEqual(user_id,1)");
    }

    #[test]
    fn compile_reports_roots_in_order() {
        let mut tree = Tree::new();
        let mut seen = vec![];
        tree.compile("w = user_id = 1; r = 1", |root, text| {
            seen.push((root.to_string(), text.to_string()))
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("r".to_string(), "1".to_string()),
                ("w".to_string(), "RelationalEqual(user_id,1)".to_string()),
            ]
        );

        tree.clear();
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.roots().count(), 0);
    }

    #[test]
    fn operator_semantics() {
        assert_eq!(Operator::LogicalOr.apply(0, 7), 1);
        assert_eq!(Operator::LogicalAnd.apply(2, 0), 0);
        assert_eq!(Operator::BitwiseOr.apply(0b01, 0b10), 0b11);
        assert_eq!(Operator::BitwiseAnd.apply(0b11, 0b10), 0b10);
        assert_eq!(Operator::RelationalEqual.apply(3, 3), 1);
        assert_eq!(Operator::RelationalNotEqual.apply(3, 3), 0);
        assert_eq!(Operator::from_name("BitwiseAnd"), Some(Operator::BitwiseAnd));
        assert_eq!(Operator::from_name("Xor"), None);
    }
}
