//! Declaration extraction: the single read-only AST walk per file.
//!
//! Collects functions, classes, interfaces, and closures into per-file
//! tables and the shared program registry, invokes registered extension
//! tree-visitors along the way, and builds each file's pruned top-level
//! CFG. The registry is populated completely before any taint traversal
//! starts and is read-only afterwards, so parallel per-file analyses
//! share it without locking.

use std::sync::Arc;

use rayon::prelude::*;
use seep_core::ast::{Node, NodeKind};
use seep_core::types::collections::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::cfg::{build_cfg, prune, Cfg};
use crate::extension::Extensions;

/// Index of a file within one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// Host input: one parsed file.
#[derive(Debug)]
pub struct SourceFile {
    pub path: String,
    pub body: Vec<Arc<Node>>,
}

/// A file with its declarations and top-level CFG.
#[derive(Debug)]
pub struct File {
    pub id: FileId,
    pub path: String,
    pub body: Vec<Arc<Node>>,
    /// Pruned CFG of the top-level statements; `None` when construction
    /// failed structurally (the file's subroutines are still usable).
    pub cfg: Option<Cfg>,
    /// Declarations keyed by lowercased name; redeclaration keeps every
    /// candidate.
    pub functions: FxHashMap<String, Vec<Arc<Node>>>,
    pub classes: FxHashMap<String, Vec<Arc<Node>>>,
    pub interfaces: FxHashMap<String, Vec<Arc<Node>>>,
    pub closures: Vec<Arc<Node>>,
}

/// A declaration and the file it came from.
#[derive(Debug, Clone)]
pub struct DeclRef {
    pub file: FileId,
    pub node: Arc<Node>,
}

/// Whole-program view: all files plus the global declaration indices.
///
/// Constructed once, then shared immutably (`Arc`) with every per-file
/// analysis.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    files: Vec<File>,
    by_path: FxHashMap<String, FileId>,
    functions: FxHashMap<String, Vec<DeclRef>>,
    classes: FxHashMap<String, Vec<DeclRef>>,
}

impl ProgramRegistry {
    /// Extract all source files (in parallel) and merge their
    /// declarations into the global indices.
    pub fn build(sources: Vec<SourceFile>, extensions: &Extensions) -> Self {
        let files: Vec<File> = sources
            .into_par_iter()
            .enumerate()
            .map(|(i, source)| extract_file(FileId(i as u32), source, extensions))
            .collect();

        let mut registry = ProgramRegistry::default();
        for file in files {
            registry.by_path.insert(file.path.clone(), file.id);
            for (name, decls) in &file.functions {
                let refs = registry.functions.entry(name.clone()).or_default();
                refs.extend(decls.iter().map(|node| DeclRef {
                    file: file.id,
                    node: Arc::clone(node),
                }));
            }
            for (name, decls) in &file.classes {
                let refs = registry.classes.entry(name.clone()).or_default();
                refs.extend(decls.iter().map(|node| DeclRef {
                    file: file.id,
                    node: Arc::clone(node),
                }));
            }
            registry.files.push(file);
        }
        debug!(
            files = registry.files.len(),
            functions = registry.functions.len(),
            classes = registry.classes.len(),
            "program registry built"
        );
        registry
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.0 as usize]
    }

    pub fn file_by_path(&self, path: &str) -> Option<&File> {
        self.by_path.get(path).map(|&id| self.file(id))
    }

    /// Function declarations with this (case-insensitive) name.
    pub fn functions_named(&self, name: &str) -> &[DeclRef] {
        self.functions
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn classes_named(&self, name: &str) -> &[DeclRef] {
        self.classes
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Method declarations for a receiver class, walking the parent
    /// chain when the class itself does not define the method.
    pub fn methods_named(&self, class: &str, method: &str) -> Vec<DeclRef> {
        let method = method.to_lowercase();
        let mut found = Vec::new();
        let mut seen_classes = FxHashSet::default();
        let mut pending = vec![class.to_lowercase()];

        while let Some(class_name) = pending.pop() {
            if !seen_classes.insert(class_name.clone()) {
                continue;
            }
            let mut found_here = false;
            for decl in self.classes_named(&class_name) {
                for member in decl.node.field_list("members") {
                    if member.is(NodeKind::FunctionDecl)
                        && member
                            .field_str("name")
                            .is_some_and(|n| n.to_lowercase() == method)
                    {
                        found.push(DeclRef { file: decl.file, node: Arc::clone(member) });
                        found_here = true;
                    }
                }
            }
            if !found_here {
                for decl in self.classes_named(&class_name) {
                    if let Some(parent) = decl.node.field_str("parent") {
                        pending.push(parent.to_lowercase());
                    }
                }
            }
        }
        found
    }

    /// Match a statically computed include path against the known file
    /// set: exact path, or suffix on either side. The longest matching
    /// path wins; ties break lexicographically.
    pub fn match_include(&self, candidate: &str) -> Option<FileId> {
        let candidate = normalize_path(candidate);
        let mut best: Option<(usize, &str, FileId)> = None;
        for file in &self.files {
            let path = normalize_path(&file.path);
            let hit = path == candidate
                || candidate.ends_with(&format!("/{path}"))
                || path.ends_with(&format!("/{candidate}"));
            if !hit {
                continue;
            }
            let replace = match best {
                None => true,
                Some((best_len, best_path, _)) => {
                    path.len() > best_len
                        || (path.len() == best_len && file.path.as_str() < best_path)
                }
            };
            if replace {
                best = Some((path.len(), &file.path, file.id));
            }
        }
        best.map(|(_, _, id)| id)
    }

    /// Every declared subroutine in the program: functions, class
    /// methods, and closures. Used by scan-all mode.
    pub fn all_subroutines(&self) -> Vec<DeclRef> {
        let mut out = Vec::new();
        for file in &self.files {
            let mut names: Vec<&String> = file.functions.keys().collect();
            names.sort();
            for name in names {
                for node in &file.functions[name] {
                    out.push(DeclRef { file: file.id, node: Arc::clone(node) });
                }
            }
            let mut class_names: Vec<&String> = file.classes.keys().collect();
            class_names.sort();
            for name in class_names {
                for class in &file.classes[name] {
                    for member in class.field_list("members") {
                        if member.is(NodeKind::FunctionDecl) {
                            out.push(DeclRef { file: file.id, node: Arc::clone(member) });
                        }
                    }
                }
            }
            for closure in &file.closures {
                out.push(DeclRef { file: file.id, node: Arc::clone(closure) });
            }
        }
        out
    }
}

fn normalize_path(path: &str) -> String {
    let mut path = path.trim_start_matches("./").to_string();
    while let Some(stripped) = path.strip_prefix("/.") {
        path = stripped.to_string();
    }
    while path.contains("/./") {
        path = path.replace("/./", "/");
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path
}

/// Walk one file, collecting declarations and notifying extension
/// visitors, then build its pruned top-level CFG.
fn extract_file(id: FileId, source: SourceFile, extensions: &Extensions) -> File {
    let mut file = File {
        id,
        path: source.path,
        body: source.body,
        cfg: None,
        functions: FxHashMap::default(),
        classes: FxHashMap::default(),
        interfaces: FxHashMap::default(),
        closures: Vec::new(),
    };

    let body = file.body.clone();
    for node in &body {
        collect(node, &mut file, extensions);
    }

    match build_cfg(&file.body) {
        Ok(mut cfg) => {
            prune(&mut cfg);
            file.cfg = Some(cfg);
        }
        Err(err) => {
            warn!(path = %file.path, %err, "skipping top-level body: CFG construction failed");
        }
    }
    file
}

fn collect(node: &Arc<Node>, file: &mut File, extensions: &Extensions) {
    for visitor in &extensions.visitors {
        visitor.visit(&file.path, node);
    }
    match node.kind() {
        NodeKind::FunctionDecl => {
            if let Some(name) = node.field_str("name") {
                file.functions
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(Arc::clone(node));
            }
        }
        NodeKind::ClassDecl => {
            if let Some(name) = node.field_str("name") {
                file.classes
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(Arc::clone(node));
            }
        }
        NodeKind::InterfaceDecl => {
            if let Some(name) = node.field_str("name") {
                file.interfaces
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(Arc::clone(node));
            }
        }
        NodeKind::Closure => {
            file.closures.push(Arc::clone(node));
        }
        _ => {}
    }
    for child in node.child_nodes() {
        collect(child, file, extensions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn registry_of(files: Vec<(&str, Vec<Node>)>) -> ProgramRegistry {
        let sources = files
            .into_iter()
            .map(|(path, body)| SourceFile {
                path: path.to_string(),
                body: body.into_iter().map(Arc::new).collect(),
            })
            .collect();
        ProgramRegistry::build(sources, &Extensions::default())
    }

    #[test]
    fn finds_conditionally_declared_functions() {
        let registry = registry_of(vec![(
            "a.php",
            vec![if_stmt(
                var("c"),
                vec![func_decl("Helper", vec![], vec![echo(vec![lit_str("hi")])])],
                vec![],
            )],
        )]);
        // lookup is case-insensitive
        assert_eq!(registry.functions_named("helper").len(), 1);
        assert_eq!(registry.functions_named("HELPER").len(), 1);
    }

    #[test]
    fn redeclared_functions_keep_every_candidate() {
        let registry = registry_of(vec![
            ("a.php", vec![func_decl("dup", vec![], vec![])]),
            ("b.php", vec![func_decl("dup", vec![], vec![])]),
        ]);
        assert_eq!(registry.functions_named("dup").len(), 2);
    }

    #[test]
    fn method_lookup_walks_parent_chain() {
        let base = class_decl("Base", None, vec![func_decl("run", vec![], vec![])]);
        let child = class_decl("Child", Some("Base"), vec![]);
        let registry = registry_of(vec![("a.php", vec![base, child])]);
        assert_eq!(registry.methods_named("child", "run").len(), 1);
        assert_eq!(registry.methods_named("base", "run").len(), 1);
        assert!(registry.methods_named("child", "missing").is_empty());
    }

    #[test]
    fn builds_pruned_top_level_cfg() {
        let registry = registry_of(vec![(
            "a.php",
            vec![assign(var("x"), lit_int(1)), echo(vec![var("x")])],
        )]);
        let file = registry.file_by_path("a.php").unwrap();
        let cfg = file.cfg.as_ref().unwrap();
        assert!(cfg.block_count() >= 4);
    }

    #[test]
    fn broken_subroutine_does_not_poison_the_file_set() {
        // `break` at top level with no loop: the file's own CFG fails,
        // but the file and its declarations are still registered.
        let registry = registry_of(vec![(
            "bad.php",
            vec![break_stmt(1), func_decl("ok", vec![], vec![])],
        )]);
        let file = registry.file_by_path("bad.php").unwrap();
        assert!(file.cfg.is_none());
        assert_eq!(registry.functions_named("ok").len(), 1);
    }

    #[test]
    fn include_matching_by_suffix() {
        let registry = registry_of(vec![("j.php", vec![]), ("lib/util.php", vec![])]);
        assert!(registry.match_include("j.php").is_some());
        assert!(registry.match_include("./j.php").is_some());
        assert!(registry.match_include("index.php/j.php").is_some());
        assert!(registry.match_include("project/lib/util.php").is_some());
        assert!(registry.match_include("missing.php").is_none());
    }
}
