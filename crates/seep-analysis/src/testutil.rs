//! Tree fixtures for tests.
//!
//! Constructors mirror the field vocabulary in `seep_core::ast`. Nodes
//! get unique synthetic line numbers by default (finding deduplication
//! is keyed by line, so distinct statements must not collide); the
//! `*_at` variants pin lines explicitly where a test asserts on them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub use seep_core::ast::{LineSpan, Node, NodeKind};

static NEXT_LINE: AtomicU32 = AtomicU32::new(1000);

fn next_line() -> LineSpan {
    LineSpan::line(NEXT_LINE.fetch_add(1, Ordering::Relaxed))
}

pub fn arc(node: Node) -> Arc<Node> {
    Arc::new(node)
}

// ---- expressions -----------------------------------------------------------

pub fn var(name: &str) -> Node {
    Node::new(NodeKind::Var, next_line()).with_str("name", name)
}

pub fn var_at(line: u32, name: &str) -> Node {
    Node::new(NodeKind::Var, LineSpan::line(line)).with_str("name", name)
}

pub fn lit_str(value: &str) -> Node {
    Node::new(NodeKind::LiteralStr, next_line()).with_str("value", value)
}

pub fn lit_int(value: i64) -> Node {
    Node::new(NodeKind::LiteralInt, next_line()).with_int("value", value)
}

pub fn magic_file() -> Node {
    Node::new(NodeKind::MagicFile, next_line())
}

pub fn magic_dir() -> Node {
    Node::new(NodeKind::MagicDir, next_line())
}

pub fn dim(base: Node, key: Node) -> Node {
    Node::new(NodeKind::ArrayDim, next_line())
        .with_node("base", base)
        .with_node("dim", key)
}

/// `$_GET['key']`
pub fn get(key: &str) -> Node {
    dim(var("_GET"), lit_str(key))
}

pub fn concat(left: Node, right: Node) -> Node {
    Node::new(NodeKind::Concat, next_line())
        .with_node("left", left)
        .with_node("right", right)
}

pub fn binary(op: &str, left: Node, right: Node) -> Node {
    Node::new(NodeKind::Binary, next_line())
        .with_str("op", op)
        .with_node("left", left)
        .with_node("right", right)
}

pub fn unary(op: &str, expr: Node) -> Node {
    Node::new(NodeKind::Unary, next_line())
        .with_str("op", op)
        .with_node("expr", expr)
}

pub fn call(name: &str, args: Vec<Node>) -> Node {
    Node::new(NodeKind::FunctionCall, next_line())
        .with_str("name", name)
        .with_nodes("args", args)
}

pub fn method_call(base: Node, name: &str, args: Vec<Node>) -> Node {
    Node::new(NodeKind::MethodCall, next_line())
        .with_node("base", base)
        .with_str("name", name)
        .with_nodes("args", args)
}

pub fn new_obj(class: &str, args: Vec<Node>) -> Node {
    Node::new(NodeKind::New, next_line())
        .with_str("class", class)
        .with_nodes("args", args)
}

// ---- statements ------------------------------------------------------------

pub fn assign(target: Node, value: Node) -> Node {
    Node::new(NodeKind::Assign, next_line())
        .with_node("target", target)
        .with_node("value", value)
}

pub fn assign_at(line: u32, target: Node, value: Node) -> Node {
    Node::new(NodeKind::Assign, LineSpan::line(line))
        .with_node("target", target)
        .with_node("value", value)
}

pub fn echo(exprs: Vec<Node>) -> Node {
    Node::new(NodeKind::Echo, next_line()).with_nodes("exprs", exprs)
}

pub fn expr_stmt(expr: Node) -> Node {
    Node::new(NodeKind::ExprStmt, next_line()).with_node("expr", expr)
}

pub fn if_stmt(cond: Node, then: Vec<Node>, els: Vec<Node>) -> Node {
    let node = Node::new(NodeKind::If, next_line())
        .with_node("cond", cond)
        .with_nodes("then", then);
    if els.is_empty() {
        node
    } else {
        node.with_nodes("else", els)
    }
}

pub fn while_stmt(cond: Node, body: Vec<Node>) -> Node {
    Node::new(NodeKind::While, next_line())
        .with_node("cond", cond)
        .with_nodes("body", body)
}

pub fn while_at(line: u32, cond: Node, body: Vec<Node>) -> Node {
    Node::new(NodeKind::While, LineSpan::line(line))
        .with_node("cond", cond)
        .with_nodes("body", body)
}

pub fn foreach_stmt(subject: Node, key: Option<Node>, value: Node, body: Vec<Node>) -> Node {
    let node = Node::new(NodeKind::Foreach, next_line())
        .with_node("subject", subject)
        .with_node("value", value)
        .with_nodes("body", body);
    match key {
        Some(key) => node.with_node("key", key),
        None => node,
    }
}

pub fn switch_stmt(subject: Node, cases: Vec<Node>) -> Node {
    Node::new(NodeKind::Switch, next_line())
        .with_node("subject", subject)
        .with_nodes("cases", cases)
}

pub fn case(cond: Option<Node>, body: Vec<Node>) -> Node {
    let node = Node::new(NodeKind::Case, next_line()).with_nodes("body", body);
    match cond {
        Some(cond) => node.with_node("cond", cond),
        None => node,
    }
}

pub fn break_stmt(level: i64) -> Node {
    Node::new(NodeKind::Break, next_line()).with_int("level", level)
}

pub fn return_stmt(value: Option<Node>) -> Node {
    let node = Node::new(NodeKind::Return, next_line());
    match value {
        Some(value) => node.with_node("value", value),
        None => node,
    }
}

pub fn goto_stmt(label: &str) -> Node {
    Node::new(NodeKind::Goto, next_line()).with_str("label", label)
}

pub fn label_stmt(name: &str) -> Node {
    Node::new(NodeKind::Label, next_line()).with_str("name", name)
}

pub fn global_stmt(names: Vec<&str>) -> Node {
    Node::new(NodeKind::Global, next_line())
        .with_nodes("vars", names.into_iter().map(var).collect())
}

pub fn include_stmt(expr: Node) -> Node {
    Node::new(NodeKind::Include, next_line())
        .with_node("expr", expr)
        .with_bool("required", false)
        .with_bool("once", false)
}

// ---- declarations ----------------------------------------------------------

pub fn param(name: &str) -> Node {
    Node::new(NodeKind::Param, next_line()).with_str("name", name)
}

pub fn func_decl(name: &str, params: Vec<&str>, body: Vec<Node>) -> Node {
    Node::new(NodeKind::FunctionDecl, next_line())
        .with_str("name", name)
        .with_nodes("params", params.into_iter().map(param).collect())
        .with_nodes("body", body)
}

pub fn class_decl(name: &str, parent: Option<&str>, members: Vec<Node>) -> Node {
    let node = Node::new(NodeKind::ClassDecl, next_line())
        .with_str("name", name)
        .with_nodes("members", members);
    match parent {
        Some(parent) => node.with_str("parent", parent),
        None => node,
    }
}
