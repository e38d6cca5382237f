//! Variable identity: scope-aware resolution with nested dimensions.
//!
//! Every distinct (scope, path) pair gets one arena slot. Resolving the
//! same syntactic path twice yields the same [`VarId`] with
//! `is_new = false` the second time; array keys that denote the same
//! value (`1` and `"1"`) resolve to the same nested variable.
//!
//! Taint does not live here. Flow state maps [`VarId`] to taint and is
//! snapshotted at merge points; the arena itself only grows during one
//! analysis, so ids stay valid across branches.

use std::sync::Arc;

use seep_core::ast::{Node, NodeKind};
use seep_core::errors::ResolveError;
use seep_core::types::collections::{FxHashMap, FxHashSet};

use crate::taint::types::TaintSets;

/// Namespace a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    /// Top-level (file) scope and `global`-imported names.
    File,
    /// Function/method locals and parameters.
    Function,
    /// Object properties and class statics.
    Instance,
    SuperGlobal,
}

/// Stable identity of a resolved variable within one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

/// Outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: VarId,
    /// First time this storage saw the path.
    pub is_new: bool,
}

/// Key of one nested dimension under a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimKey {
    Int(i64),
    Str(String),
    /// Object property / class static (kept apart from string array
    /// keys: `$o->x` and `$o['x']` are different storage).
    Prop(String),
}

impl DimKey {
    /// Canonicalize an array key: strings spelling an integer collapse
    /// onto the integer key, the way the original language indexes.
    pub fn array_key(raw: &str) -> DimKey {
        if let Ok(n) = raw.parse::<i64>() {
            if n.to_string() == raw {
                return DimKey::Int(n);
            }
        }
        DimKey::Str(raw.to_string())
    }

    fn display(&self) -> String {
        match self {
            DimKey::Int(n) => format!("[{n}]"),
            DimKey::Str(s) => format!("[{s}]"),
            DimKey::Prop(p) => format!("->{p}"),
        }
    }
}

/// One variable: name, namespace, nested dimensions, and the taint
/// defaults applied when a path is read before it was ever written.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Display path (`$_GET[a]`, `$x`, `$obj->prop`).
    pub name: String,
    pub scope: VarScope,
    /// Taint assumed when this variable is read with no prior write.
    pub default_taint: Option<TaintSets>,
    /// Factory default handed to dimensions that have not been seen
    /// yet (a fresh `$_GET[...]` is tainted without ever being
    /// assigned).
    pub default_child_taint: Option<TaintSets>,
    /// Candidate class names for object-valued variables.
    pub class_hints: Vec<String>,
    children: FxHashMap<DimKey, VarId>,
}

impl Variable {
    fn new(name: String, scope: VarScope) -> Self {
        Self {
            name,
            scope,
            default_taint: None,
            default_child_taint: None,
            class_hints: Vec::new(),
            children: FxHashMap::default(),
        }
    }
}

const SUPERGLOBALS: &[&str] = &[
    "GLOBALS", "_GET", "_POST", "_REQUEST", "_COOKIE", "_SERVER", "_FILES", "_ENV", "_SESSION",
];

pub fn is_superglobal(name: &str) -> bool {
    SUPERGLOBALS.contains(&name)
}

#[derive(Debug, Default)]
struct Frame {
    locals: FxHashMap<String, VarId>,
    /// Names pulled in with a `global` import statement.
    visible_globals: FxHashSet<String>,
}

/// Arena of variables plus the namespace indices resolution goes
/// through.
#[derive(Debug, Default)]
pub struct VarStorage {
    vars: Vec<Variable>,
    superglobals: FxHashMap<String, VarId>,
    globals: FxHashMap<String, VarId>,
    /// Object/class members keyed `class::prop`.
    members: FxHashMap<String, VarId>,
    frames: Vec<Frame>,
}

impl VarStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0 as usize]
    }

    /// Enter a function-local namespace (call analysis).
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Make `name` refer to the process-wide global inside the current
    /// frame (`global $x;`).
    pub fn import_global(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.visible_globals.insert(name.to_string());
        }
    }

    fn alloc(&mut self, var: Variable) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(var);
        id
    }

    /// Resolve a plain `$name` reference.
    pub fn resolve_name(&mut self, name: &str) -> Resolved {
        if is_superglobal(name) {
            return self.resolve_in_namespace(name, VarScope::SuperGlobal);
        }
        match self.frames.last() {
            Some(frame) if !frame.visible_globals.contains(name) => {
                if let Some(&id) = frame.locals.get(name) {
                    return Resolved { id, is_new: false };
                }
                let id = self.alloc(Variable::new(format!("${name}"), VarScope::Function));
                self.frames
                    .last_mut()
                    .expect("frame checked above")
                    .locals
                    .insert(name.to_string(), id);
                Resolved { id, is_new: true }
            }
            _ => self.resolve_in_namespace(name, VarScope::File),
        }
    }

    fn resolve_in_namespace(&mut self, name: &str, scope: VarScope) -> Resolved {
        let ns = match scope {
            VarScope::SuperGlobal => &mut self.superglobals,
            _ => &mut self.globals,
        };
        if let Some(&id) = ns.get(name) {
            return Resolved { id, is_new: false };
        }
        let id = self.alloc(Variable::new(format!("${name}"), scope));
        let ns = match scope {
            VarScope::SuperGlobal => &mut self.superglobals,
            _ => &mut self.globals,
        };
        ns.insert(name.to_string(), id);
        Resolved { id, is_new: true }
    }

    /// Descend one dimension under `base`, creating the nested variable
    /// on first sight. Defaults cascade: a new child inherits the
    /// parent's child-default as both its own default and its child
    /// factory.
    pub fn resolve_dim(&mut self, base: VarId, key: DimKey) -> Resolved {
        if let Some(&id) = self.var(base).children.get(&key) {
            return Resolved { id, is_new: false };
        }
        let parent = self.var(base);
        let name = format!("{}{}", parent.name, key.display());
        let scope = parent.scope;
        let default = parent.default_child_taint.clone();
        let mut child = Variable::new(name, scope);
        child.default_taint = default.clone();
        child.default_child_taint = default;
        let id = self.alloc(child);
        self.var_mut(base).children.insert(key, id);
        Resolved { id, is_new: true }
    }

    /// Resolve a variable-shaped expression node. Dynamic names,
    /// computed keys, and dynamic properties are unsupported shapes the
    /// caller treats as opaque.
    pub fn resolve(&mut self, node: &Arc<Node>) -> Result<Resolved, ResolveError> {
        let unsupported = || ResolveError::UnsupportedShape {
            kind: node.kind(),
            line: node.lines().start,
        };
        match node.kind() {
            NodeKind::Var => match node.field_str("name") {
                Some(name) => Ok(self.resolve_name(name)),
                None => Err(unsupported()),
            },
            NodeKind::ArrayDim => {
                let base = node.field("base").ok_or_else(unsupported)?;
                let resolved_base = self.resolve(base)?;
                let key = match node.field("dim") {
                    Some(dim) => match dim.kind() {
                        NodeKind::LiteralStr => dim
                            .field_str("value")
                            .map(DimKey::array_key)
                            .ok_or_else(unsupported)?,
                        NodeKind::LiteralInt => {
                            DimKey::Int(dim.field_int("value").ok_or_else(unsupported)?)
                        }
                        _ => return Err(unsupported()),
                    },
                    // Append (`$a[] = ...`) has no static key.
                    None => return Err(unsupported()),
                };
                Ok(self.resolve_dim(resolved_base.id, key))
            }
            NodeKind::PropFetch => {
                let base = node.field("base").ok_or_else(unsupported)?;
                let resolved_base = self.resolve(base)?;
                let prop = node.field_str("prop").ok_or_else(unsupported)?;
                Ok(self.resolve_dim(resolved_base.id, DimKey::Prop(prop.to_string())))
            }
            NodeKind::StaticPropFetch => {
                let class = node.field_str("class").ok_or_else(unsupported)?;
                let prop = node.field_str("prop").ok_or_else(unsupported)?;
                let key = format!("{}::{}", class.to_lowercase(), prop);
                if let Some(&id) = self.members.get(&key) {
                    return Ok(Resolved { id, is_new: false });
                }
                let id = self.alloc(Variable::new(
                    format!("{class}::${prop}"),
                    VarScope::Instance,
                ));
                self.members.insert(key, id);
                Ok(Resolved { id, is_new: true })
            }
            _ => Err(unsupported()),
        }
    }

    /// Base variable of a dimension/property chain (`$a` for
    /// `$a[1][2]`), for conservative fallbacks when the full path has
    /// no static identity.
    pub fn resolve_root(&mut self, node: &Arc<Node>) -> Option<Resolved> {
        match node.kind() {
            NodeKind::Var => node.field_str("name").map(|n| self.resolve_name(n)),
            NodeKind::ArrayDim | NodeKind::PropFetch => {
                node.field("base").and_then(|base| self.resolve_root(base))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn same_path_resolves_to_same_identity() {
        // $a[1]; $a[1]; $a[2];
        let mut storage = VarStorage::new();
        let first = storage.resolve(&arc(dim(var("a"), lit_int(1)))).unwrap();
        assert!(first.is_new);
        let again = storage.resolve(&arc(dim(var("a"), lit_int(1)))).unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.is_new);
        let other = storage.resolve(&arc(dim(var("a"), lit_int(2)))).unwrap();
        assert!(other.is_new);
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn numeric_string_key_matches_integer_key() {
        let mut storage = VarStorage::new();
        let by_int = storage.resolve(&arc(dim(var("a"), lit_int(1)))).unwrap();
        let by_str = storage.resolve(&arc(dim(var("a"), lit_str("1")))).unwrap();
        assert_eq!(by_int.id, by_str.id);
        assert!(!by_str.is_new);
        // But "01" is a genuinely different string key.
        let padded = storage.resolve(&arc(dim(var("a"), lit_str("01")))).unwrap();
        assert_ne!(padded.id, by_int.id);
    }

    #[test]
    fn function_frame_shadows_file_scope() {
        let mut storage = VarStorage::new();
        let file_var = storage.resolve_name("x");
        storage.push_frame();
        let local = storage.resolve_name("x");
        assert_ne!(local.id, file_var.id);
        assert!(local.is_new);
        assert_eq!(storage.var(local.id).scope, VarScope::Function);
        storage.pop_frame();
        let back = storage.resolve_name("x");
        assert_eq!(back.id, file_var.id);
    }

    #[test]
    fn global_import_aliases_file_scope() {
        let mut storage = VarStorage::new();
        let file_var = storage.resolve_name("conf");
        storage.push_frame();
        storage.import_global("conf");
        let seen = storage.resolve_name("conf");
        assert_eq!(seen.id, file_var.id);
        assert!(!seen.is_new);
        storage.pop_frame();
    }

    #[test]
    fn superglobals_resolve_in_any_frame() {
        let mut storage = VarStorage::new();
        let top = storage.resolve_name("_GET");
        storage.push_frame();
        let inner = storage.resolve_name("_GET");
        assert_eq!(top.id, inner.id);
        assert_eq!(storage.var(top.id).scope, VarScope::SuperGlobal);
    }

    #[test]
    fn dynamic_shapes_are_unsupported() {
        let mut storage = VarStorage::new();
        // $$x
        let dynamic = Node::new(NodeKind::Var, seep_core::ast::LineSpan::line(1))
            .with_node("expr", var("x"));
        assert!(storage.resolve(&arc(dynamic)).is_err());
        // $a[$i]
        let computed = dim(var("a"), var("i"));
        assert!(storage.resolve(&arc(computed)).is_err());
        // but the chain root still resolves for conservative handling
        let root = storage.resolve_root(&arc(dim(var("a"), var("i")))).unwrap();
        assert_eq!(storage.var(root.id).name, "$a");
    }

    #[test]
    fn child_defaults_cascade_from_parent_factory() {
        use crate::taint::types::TaintSets;
        let mut storage = VarStorage::new();
        let get = storage.resolve_name("_GET");
        storage.var_mut(get.id).default_child_taint = Some(TaintSets::tainted());
        let child = storage.resolve(&arc(dim(var("_GET"), lit_str("a")))).unwrap();
        assert!(storage.var(child.id).default_taint.as_ref().unwrap().xss.is_tainted());
        // grandchildren keep the factory
        let grand = storage.resolve_dim(child.id, DimKey::Int(0));
        assert!(storage.var(grand.id).default_taint.as_ref().unwrap().sql.is_tainted());
    }
}
