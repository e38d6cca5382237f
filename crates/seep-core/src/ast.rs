//! Read-only syntax tree contract.
//!
//! The engine never parses source text. A host parser produces this tree
//! once per file and the engine consumes it through read-only traversal.
//! A node exposes exactly three things: its kind, named sub-fields
//! (nodes, node lists, or scalars), and a line span. Nothing here leaks
//! parser-specific encoding details.
//!
//! Subtrees are shared via [`Arc`] so declarations, block anchors, and
//! diagnostic stacks can hold references without tying the analysis to
//! the lifetime of a borrow.
//!
//! ## Field vocabulary
//!
//! The builder and transfer functions agree on these field names:
//!
//! | kind | fields |
//! |---|---|
//! | `StmtList` | `stmts` |
//! | `Assign` | `target`, `value`, optional `op` (compound assign operator) |
//! | `Echo` | `exprs` |
//! | `If` / `ElseIf` | `cond`, `then`, `elseifs`, `else` |
//! | `While` | `cond`, `body` |
//! | `DoWhile` | `body`, `cond` |
//! | `For` | `init`, `cond`, `update`, `body` |
//! | `Foreach` | `subject`, `key`, `value`, `body` |
//! | `Switch` / `Case` | `subject`, `cases` / `cond` (absent = default), `body` |
//! | `Break` / `Continue` | `level` |
//! | `Return` | `value` |
//! | `Goto` / `Label` | `label` / `name` |
//! | `Global` | `vars` |
//! | `Throw` | `value` |
//! | `FunctionDecl` | `name`, `params`, `body` |
//! | `Param` | `name`, `default`, `by_ref` |
//! | `ClassDecl` | `name`, `parent`, `members` |
//! | `PropertyDecl` | `name`, `default` |
//! | `InterfaceDecl` | `name`, `members` |
//! | `Closure` | `params`, `uses`, `body` |
//! | `Include` | `expr`, `required`, `once` |
//! | `ExprStmt` | `expr` |
//! | `Var` | `name`, or `expr` for a dynamic `$$x` |
//! | `ArrayDim` | `base`, `dim` (absent for an append `$a[]`) |
//! | `PropFetch` | `base`, `prop`, or `expr` for a dynamic property |
//! | `StaticPropFetch` | `class`, `prop` |
//! | `FunctionCall` | `name` (or `expr` when dynamic), `args` |
//! | `MethodCall` | `base`, `name`, `args` |
//! | `StaticCall` | `class`, `name`, `args` |
//! | `New` | `class`, `args` |
//! | `Concat` / `Binary` / `Unary` | `left`, `right` / `op`, `left`, `right` / `op`, `expr` |
//! | `Ternary` | `cond`, `then`, `else` |
//! | `LiteralStr` / `LiteralInt` / `LiteralFloat` / `LiteralBool` | `value` |
//! | `ArrayLit` / `ArrayItem` | `items` / `key`, `value` |
//! | `Encaps` | `parts` |
//! | `Cast` | `to`, `expr` |
//! | `Isset` | `vars` |

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Inclusive start/end source lines of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: u32,
    pub end: u32,
}

impl LineSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// A single-line span.
    pub fn line(line: u32) -> Self {
        Self { start: line, end: line }
    }
}

impl fmt::Display for LineSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// The kind identifier of a syntax node.
///
/// Hosts map their parser's node types onto these kinds; the engine
/// never sees anything finer-grained. `Unknown` is the catch-all for
/// shapes the engine treats as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    // Statements
    StmtList,
    Assign,
    Echo,
    If,
    ElseIf,
    While,
    DoWhile,
    For,
    Foreach,
    Switch,
    Case,
    Break,
    Continue,
    Return,
    Goto,
    Label,
    Global,
    Throw,
    FunctionDecl,
    Param,
    ClassDecl,
    PropertyDecl,
    InterfaceDecl,
    Closure,
    Include,
    ExprStmt,
    // Expressions
    Var,
    ArrayDim,
    PropFetch,
    StaticPropFetch,
    FunctionCall,
    MethodCall,
    StaticCall,
    New,
    Concat,
    Binary,
    Unary,
    Ternary,
    LiteralStr,
    LiteralInt,
    LiteralFloat,
    LiteralBool,
    LiteralNull,
    MagicFile,
    MagicDir,
    ArrayLit,
    ArrayItem,
    Encaps,
    Cast,
    Isset,
    Unknown,
}

/// A named sub-field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Node(Arc<Node>),
    Nodes(Vec<Arc<Node>>),
    Str(String),
    Int(i64),
    Bool(bool),
}

/// One node of the host-supplied syntax tree.
///
/// Immutable after construction. Fields are stored in insertion order;
/// nodes carry few fields, so lookup is a linear scan.
#[derive(Debug, PartialEq)]
pub struct Node {
    kind: NodeKind,
    lines: LineSpan,
    fields: Vec<(&'static str, Field)>,
}

impl Node {
    pub fn new(kind: NodeKind, lines: LineSpan) -> Self {
        Self { kind, lines, fields: Vec::new() }
    }

    /// Attach a child node field.
    pub fn with_node(mut self, name: &'static str, child: impl Into<Arc<Node>>) -> Self {
        self.fields.push((name, Field::Node(child.into())));
        self
    }

    /// Attach an ordered list of child nodes.
    pub fn with_nodes(mut self, name: &'static str, children: Vec<Node>) -> Self {
        let children = children.into_iter().map(Arc::new).collect();
        self.fields.push((name, Field::Nodes(children)));
        self
    }

    /// Attach a list of already-shared child nodes.
    pub fn with_shared_nodes(mut self, name: &'static str, children: Vec<Arc<Node>>) -> Self {
        self.fields.push((name, Field::Nodes(children)));
        self
    }

    pub fn with_str(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((name, Field::Str(value.into())));
        self
    }

    pub fn with_int(mut self, name: &'static str, value: i64) -> Self {
        self.fields.push((name, Field::Int(value)));
        self
    }

    pub fn with_bool(mut self, name: &'static str, value: bool) -> Self {
        self.fields.push((name, Field::Bool(value)));
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    pub fn lines(&self) -> LineSpan {
        self.lines
    }

    fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, f)| f)
    }

    /// Look up a single-node field by name.
    pub fn field(&self, name: &str) -> Option<&Arc<Node>> {
        match self.get(name) {
            Some(Field::Node(n)) => Some(n),
            _ => None,
        }
    }

    /// Look up a node-list field by name. Absent fields read as empty.
    pub fn field_list(&self, name: &str) -> &[Arc<Node>] {
        match self.get(name) {
            Some(Field::Nodes(ns)) => ns,
            _ => &[],
        }
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Field::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn field_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Field::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(Field::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// All node-valued children, in field order. Drives generic walks
    /// that do not care about field names.
    pub fn child_nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.fields.iter().flat_map(|(_, f)| {
            let children: &[Arc<Node>] = match f {
                Field::Node(n) => std::slice::from_ref(n),
                Field::Nodes(ns) => ns,
                _ => &[],
            };
            children.iter()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_by_name() {
        let node = Node::new(NodeKind::Assign, LineSpan::line(3))
            .with_node("target", Node::new(NodeKind::Var, LineSpan::line(3)).with_str("name", "x"))
            .with_node("value", Node::new(NodeKind::LiteralInt, LineSpan::line(3)).with_int("value", 7));

        assert_eq!(node.kind(), NodeKind::Assign);
        assert_eq!(node.field("target").unwrap().field_str("name"), Some("x"));
        assert_eq!(node.field("value").unwrap().field_int("value"), Some(7));
        assert!(node.field("missing").is_none());
        assert!(node.field_list("missing").is_empty());
    }

    #[test]
    fn child_nodes_walks_all_node_fields() {
        let node = Node::new(NodeKind::Echo, LineSpan::line(1)).with_nodes(
            "exprs",
            vec![
                Node::new(NodeKind::LiteralStr, LineSpan::line(1)).with_str("value", "a"),
                Node::new(NodeKind::Var, LineSpan::line(1)).with_str("name", "x"),
            ],
        );
        assert_eq!(node.child_nodes().count(), 2);
    }
}
