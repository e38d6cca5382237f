//! Error taxonomy.
//!
//! Only catalog problems are fatal to a run. Everything else stays
//! inside its per-file or per-subroutine boundary: a CFG build error
//! skips one subroutine, a resolution error makes one access opaque.

use thiserror::Error;

use crate::ast::NodeKind;

/// Structural failure while building a control-flow graph.
///
/// Fails construction of the offending subroutine's graph only; the
/// caller skips that subroutine and keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CfgError {
    #[error("break/continue level {level} exceeds loop nesting depth {depth} at line {line}")]
    BreakLevelOutOfRange { level: i64, depth: usize, line: u32 },

    #[error("goto label `{label}` not found")]
    LabelNotFound { label: String },

    #[error("malformed {kind:?} node at line {line}: missing `{field}`")]
    MissingField {
        kind: NodeKind,
        field: &'static str,
        line: u32,
    },
}

/// Function-specification catalog failure. Fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read function catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed function catalog: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A variable reference the resolver cannot give a static identity
/// (dynamic variable names, computed dimension keys, dynamic property
/// names). Callers treat the access as opaque, never as a failure of
/// the enclosing analysis.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unsupported {kind:?} shape for variable resolution at line {line}")]
    UnsupportedShape { kind: NodeKind, line: u32 },
}
