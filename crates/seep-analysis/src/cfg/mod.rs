//! Per-file control-flow representation.
//!
//! A subroutine or top-level body becomes a [`Cfg`]: one root, at least
//! one leaf, blocks anchored to at most one syntax node each, edges
//! tagged `Normal`/`True`/`False`. The builder wires compound statements
//! through a scope stack; the pruner removes unreachable blocks and
//! splices out empty pass-through blocks.

pub mod builder;
pub mod graph;
pub mod pruner;
pub mod scope;

pub use builder::build_cfg;
pub use graph::{Block, Cfg, CfgEdge, EdgeKind};
pub use pruner::prune;
