//! Branch-condition desanitization.
//!
//! Best-effort, not sound: a recognized guard narrows the guarded
//! variable's taint along the edge where the guard holds. Anything
//! unrecognized leaves taint untouched.

use std::sync::Arc;

use seep_core::ast::{Node, NodeKind};

use super::flow::TaintEnv;
use super::types::{ExpressionInfo, ScalarValue};
use crate::vars::VarStorage;

/// Guards that prove a value is numeric (or otherwise harmless) when
/// they succeed.
const NUMERIC_GUARDS: &[&str] = &[
    "is_numeric",
    "is_int",
    "is_integer",
    "is_long",
    "is_float",
    "is_double",
    "is_bool",
    "ctype_digit",
    "ctype_alnum",
    "ctype_alpha",
];

/// Narrow `env` for the edge where `cond` evaluated to `branch`.
pub fn narrow(storage: &mut VarStorage, cond: &Arc<Node>, branch: bool, env: &mut TaintEnv) {
    match cond.kind() {
        NodeKind::Unary if cond.field_str("op") == Some("!") => {
            if let Some(inner) = cond.field("expr") {
                narrow(storage, inner, !branch, env);
            }
        }
        NodeKind::FunctionCall if branch => {
            let Some(name) = cond.field_str("name") else { return };
            if !NUMERIC_GUARDS.contains(&name.to_lowercase().as_str()) {
                return;
            }
            if let Some(arg) = cond.field_list("args").first() {
                clear_taint(storage, arg, env, None);
            }
        }
        NodeKind::Binary => {
            let op = cond.field_str("op").unwrap_or_default();
            match op {
                // Both operands hold on the true edge.
                "&&" | "and" if branch => {
                    narrow_both(storage, cond, branch, env);
                }
                // Both operands failed on the false edge.
                "||" | "or" if !branch => {
                    narrow_both(storage, cond, branch, env);
                }
                // Equality against a literal pins the value.
                "==" | "===" if branch => narrow_equality(storage, cond, env),
                "!=" | "!==" if !branch => narrow_equality(storage, cond, env),
                _ => {}
            }
        }
        _ => {}
    }
}

fn narrow_both(storage: &mut VarStorage, cond: &Arc<Node>, branch: bool, env: &mut TaintEnv) {
    if let Some(left) = cond.field("left") {
        narrow(storage, left, branch, env);
    }
    if let Some(right) = cond.field("right") {
        narrow(storage, right, branch, env);
    }
}

fn narrow_equality(storage: &mut VarStorage, cond: &Arc<Node>, env: &mut TaintEnv) {
    let (Some(left), Some(right)) = (cond.field("left"), cond.field("right")) else {
        return;
    };
    // One side a literal scalar, the other a resolvable variable.
    let (literal, variable) = match (literal_value(left), literal_value(right)) {
        (Some(value), None) => (value, right),
        (None, Some(value)) => (value, left),
        _ => return,
    };
    clear_taint(storage, variable, env, Some(literal));
}

fn literal_value(node: &Arc<Node>) -> Option<ScalarValue> {
    match node.kind() {
        NodeKind::LiteralStr => node.field_str("value").map(|s| ScalarValue::Str(s.to_string())),
        NodeKind::LiteralInt => node.field_int("value").map(ScalarValue::Int),
        NodeKind::LiteralBool => node.field_bool("value").map(ScalarValue::Bool),
        _ => None,
    }
}

fn clear_taint(
    storage: &mut VarStorage,
    node: &Arc<Node>,
    env: &mut TaintEnv,
    value: Option<ScalarValue>,
) {
    let Ok(resolved) = storage.resolve(node) else { return };
    let mut info = ExpressionInfo::empty();
    info.value = value;
    env.set(resolved.id, info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::types::TaintSets;
    use crate::testutil::*;

    fn tainted_env(storage: &mut VarStorage, name: &str) -> TaintEnv {
        let resolved = storage.resolve_name(name);
        let mut env = TaintEnv::new();
        env.set(resolved.id, ExpressionInfo::with_taints(TaintSets::tainted()));
        env
    }

    fn taint_of(storage: &mut VarStorage, env: &TaintEnv, name: &str) -> bool {
        let resolved = storage.resolve_name(name);
        env.get(resolved.id).map(|i| i.taints.xss.is_tainted()).unwrap_or(false)
    }

    #[test]
    fn numeric_guard_narrows_true_edge_only() {
        let mut storage = VarStorage::new();
        let env = tainted_env(&mut storage, "x");
        let guard = arc(call("is_numeric", vec![var("x")]));

        let mut true_env = env.clone();
        narrow(&mut storage, &guard, true, &mut true_env);
        assert!(!taint_of(&mut storage, &true_env, "x"));

        let mut false_env = env.clone();
        narrow(&mut storage, &guard, false, &mut false_env);
        assert!(taint_of(&mut storage, &false_env, "x"));
    }

    #[test]
    fn negated_guard_narrows_false_edge() {
        let mut storage = VarStorage::new();
        let env = tainted_env(&mut storage, "x");
        let guard = arc(unary("!", call("is_numeric", vec![var("x")])));

        let mut false_env = env.clone();
        narrow(&mut storage, &guard, false, &mut false_env);
        assert!(!taint_of(&mut storage, &false_env, "x"));

        let mut true_env = env.clone();
        narrow(&mut storage, &guard, true, &mut true_env);
        assert!(taint_of(&mut storage, &true_env, "x"));
    }

    #[test]
    fn equality_with_literal_pins_value_and_clears_taint() {
        let mut storage = VarStorage::new();
        let env = tainted_env(&mut storage, "x");
        let guard = arc(binary("==", var("x"), lit_str("list")));

        let mut true_env = env.clone();
        narrow(&mut storage, &guard, true, &mut true_env);
        assert!(!taint_of(&mut storage, &true_env, "x"));
        let resolved = storage.resolve_name("x");
        assert_eq!(
            true_env.get(resolved.id).and_then(|i| i.value.clone()),
            Some(ScalarValue::Str("list".into()))
        );
    }

    #[test]
    fn conjunction_narrows_both_operands_on_true() {
        let mut storage = VarStorage::new();
        let mut env = tainted_env(&mut storage, "x");
        let y = storage.resolve_name("y");
        env.set(y.id, ExpressionInfo::with_taints(TaintSets::tainted()));
        let guard = arc(binary(
            "&&",
            call("is_numeric", vec![var("x")]),
            call("is_int", vec![var("y")]),
        ));
        narrow(&mut storage, &guard, true, &mut env);
        assert!(!taint_of(&mut storage, &env, "x"));
        assert!(!taint_of(&mut storage, &env, "y"));
    }

    #[test]
    fn unrecognized_guards_change_nothing() {
        let mut storage = VarStorage::new();
        let mut env = tainted_env(&mut storage, "x");
        let guard = arc(call("custom_check", vec![var("x")]));
        narrow(&mut storage, &guard, true, &mut env);
        assert!(taint_of(&mut storage, &env, "x"));
    }
}
