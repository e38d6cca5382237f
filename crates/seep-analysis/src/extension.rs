//! Host extension points.
//!
//! Discovery is the host's problem; the engine takes a plain
//! registration list assembled before the run starts. Extension objects
//! are shared across parallel per-file analyses, hence `Send + Sync`.

use std::sync::Arc;

use seep_core::ast::Node;

use crate::report::Reporter;
use crate::taint::types::{ExpressionInfo, TaintSets};
use crate::vars::{VarScope, VarStorage};

/// Invoked on every node during the declaration-extraction walk.
pub trait TreeVisitor: Send + Sync {
    fn visit(&self, path: &str, node: &Arc<Node>);
}

/// Runs alongside the built-in taint transfer on every anchored block
/// statement, with the same inputs, and may replace the computed
/// expression info.
pub trait BlockAnalyzer: Send + Sync {
    fn analyze(
        &self,
        node: &Arc<Node>,
        info: ExpressionInfo,
        storage: &VarStorage,
        reporter: &dyn Reporter,
    ) -> ExpressionInfo;
}

/// Overrides the built-in default-taint seeding for variables read
/// before any write (super-globals, globals).
pub trait TaintSeeder: Send + Sync {
    /// `None` falls back to the built-in default for that name.
    fn default_taint(&self, scope: VarScope, name: &str) -> Option<TaintSets>;
}

/// Analysis lifecycle notifications.
pub trait AnalysisListener: Send + Sync {
    fn analysis_started(&self) {}
    fn analysis_finished(&self) {}
}

/// The host-assembled extension list handed to the engine.
#[derive(Default)]
pub struct Extensions {
    pub visitors: Vec<Box<dyn TreeVisitor>>,
    pub block_analyzers: Vec<Box<dyn BlockAnalyzer>>,
    pub taint_seeder: Option<Box<dyn TaintSeeder>>,
    pub listeners: Vec<Box<dyn AnalysisListener>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visitor(mut self, visitor: Box<dyn TreeVisitor>) -> Self {
        self.visitors.push(visitor);
        self
    }

    pub fn with_block_analyzer(mut self, analyzer: Box<dyn BlockAnalyzer>) -> Self {
        self.block_analyzers.push(analyzer);
        self
    }

    pub fn with_taint_seeder(mut self, seeder: Box<dyn TaintSeeder>) -> Self {
        self.taint_seeder = Some(seeder);
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn AnalysisListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("visitors", &self.visitors.len())
            .field("block_analyzers", &self.block_analyzers.len())
            .field("taint_seeder", &self.taint_seeder.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
