//! Static include/require target resolution.
//!
//! Handles literal paths and concatenation chains built from literals
//! and the current-file/current-directory magic constants. Any other
//! expression shape (a variable, a call result, request data) fails
//! resolution; the caller then treats the include target as unknown and
//! keeps analyzing.

use std::sync::Arc;

use seep_core::ast::{Node, NodeKind};
use tracing::debug;

use crate::extract::{FileId, ProgramRegistry};

/// Resolve an include expression against the known file set.
pub fn resolve_include(
    expr: &Arc<Node>,
    current_file: &str,
    registry: &ProgramRegistry,
) -> Option<FileId> {
    let candidate = eval_include_path(expr, current_file)?;
    let resolved = registry.match_include(&candidate);
    if resolved.is_none() {
        debug!(candidate, current_file, "include target not in file set");
    }
    resolved
}

/// Statically evaluate an include path expression. `None` when any part
/// of it is not a literal or magic constant.
pub fn eval_include_path(expr: &Arc<Node>, current_file: &str) -> Option<String> {
    match expr.kind() {
        NodeKind::LiteralStr => expr.field_str("value").map(str::to_string),
        NodeKind::MagicFile => Some(current_file.to_string()),
        NodeKind::MagicDir => Some(dirname(current_file).to_string()),
        NodeKind::Concat => {
            let left = eval_include_path(expr.field("left")?, current_file)?;
            let right = eval_include_path(expr.field("right")?, current_file)?;
            Some(format!("{left}{right}"))
        }
        NodeKind::Binary if expr.field_str("op") == Some(".") => {
            let left = eval_include_path(expr.field("left")?, current_file)?;
            let right = eval_include_path(expr.field("right")?, current_file)?;
            Some(format!("{left}{right}"))
        }
        _ => None,
    }
}

fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(pos) => &path[..pos],
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Extensions;
    use crate::extract::SourceFile;
    use crate::testutil::*;

    fn files(paths: &[&str]) -> ProgramRegistry {
        let sources = paths
            .iter()
            .map(|p| SourceFile { path: p.to_string(), body: vec![] })
            .collect();
        ProgramRegistry::build(sources, &Extensions::default())
    }

    #[test]
    fn literal_relative_path_resolves() {
        let registry = files(&["j.php"]);
        let expr = arc(lit_str("./j.php"));
        assert!(resolve_include(&expr, "index.php", &registry).is_some());
    }

    #[test]
    fn magic_file_concat_resolves() {
        let registry = files(&["j.php"]);
        // include(__FILE__ . '/j.php');
        let expr = arc(concat(magic_file(), lit_str("/j.php")));
        assert!(resolve_include(&expr, "index.php", &registry).is_some());
        // include(__FILE__ . '/' . 'j.php');
        let expr = arc(concat(concat(magic_file(), lit_str("/")), lit_str("j.php")));
        assert!(resolve_include(&expr, "index.php", &registry).is_some());
    }

    #[test]
    fn magic_dir_resolves_siblings() {
        let registry = files(&["lib/j.php"]);
        let expr = arc(concat(magic_dir(), lit_str("/j.php")));
        assert_eq!(
            eval_include_path(&expr, "lib/index.php").as_deref(),
            Some("lib/j.php")
        );
        assert!(resolve_include(&expr, "lib/index.php", &registry).is_some());
    }

    #[test]
    fn dynamic_suffix_fails_resolution() {
        let registry = files(&["j.php"]);
        // include(__FILE__ . $_GET['a']);
        let expr = arc(concat(magic_file(), dim(var("_GET"), lit_str("a"))));
        assert!(eval_include_path(&expr, "index.php").is_none());
        assert!(resolve_include(&expr, "index.php", &registry).is_none());
    }

    #[test]
    fn variable_path_fails_resolution() {
        let registry = files(&["j.php"]);
        let expr = arc(var("path"));
        assert!(resolve_include(&expr, "index.php", &registry).is_none());
    }
}
