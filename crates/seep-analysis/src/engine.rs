//! Whole-run orchestration.
//!
//! Two strictly ordered phases: (1) parallel declaration extraction
//! into the program registry, which is then frozen; (2) parallel
//! per-file taint analysis. Workers stream findings through a channel;
//! the engine drains, sorts, and forwards them to the host reporter so
//! output order is deterministic regardless of scheduling. Stored
//! correlation and scan-all run after the parallel phase.
//!
//! Cancellation is cooperative and file-grained: a set flag means "do
//! not start the next file", never "abort mid-traversal".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use seep_core::config::AnalysisConfig;
use seep_core::types::collections::FxHashSet;
use tracing::{debug, info};

use crate::catalog::FunctionCatalog;
use crate::extension::Extensions;
use crate::extract::{ProgramRegistry, SourceFile};
use crate::report::{ChannelReporter, Finding, Reporter};
use crate::stored::StoredCorrelator;
use crate::taint::flow::{analyze_file, analyze_subroutine_default, RunContext};

/// Summary of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisStats {
    pub files: usize,
    /// Total findings forwarded to the reporter, stored ones included.
    pub findings: usize,
    pub stored_findings: usize,
    /// Subroutines analyzed by scan-all mode.
    pub scanned_subroutines: usize,
    /// False when any traversal stopped at its step budget.
    pub converged: bool,
    pub duration: Duration,
}

/// The analysis engine. Construct once, run over a set of parsed files.
pub struct Engine {
    catalog: FunctionCatalog,
    config: AnalysisConfig,
    extensions: Extensions,
}

impl Engine {
    pub fn new(catalog: FunctionCatalog, config: AnalysisConfig) -> Self {
        Self { catalog, config, extensions: Extensions::default() }
    }

    /// Attach host extensions (explicit registration list; discovery is
    /// the host's concern).
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Analyze `sources`, reporting findings to `reporter`.
    pub fn analyze(&self, sources: Vec<SourceFile>, reporter: &dyn Reporter) -> AnalysisStats {
        self.analyze_with_cancel(sources, reporter, &AtomicBool::new(false))
    }

    /// Like [`analyze`](Self::analyze), with cooperative cancellation:
    /// once `cancelled` is set, no further file or subroutine analysis
    /// starts.
    pub fn analyze_with_cancel(
        &self,
        sources: Vec<SourceFile>,
        reporter: &dyn Reporter,
        cancelled: &AtomicBool,
    ) -> AnalysisStats {
        let threads = self.config.effective_threads();
        let pool = (threads > 0)
            .then(|| rayon::ThreadPoolBuilder::new().num_threads(threads).build().ok())
            .flatten();
        match pool {
            Some(pool) => pool.install(|| self.run(sources, reporter, cancelled)),
            None => self.run(sources, reporter, cancelled),
        }
    }

    fn run(
        &self,
        sources: Vec<SourceFile>,
        reporter: &dyn Reporter,
        cancelled: &AtomicBool,
    ) -> AnalysisStats {
        let start = Instant::now();
        for listener in &self.extensions.listeners {
            listener.analysis_started();
        }

        // Phase 1: registry build, complete before any traversal.
        let registry = ProgramRegistry::build(sources, &self.extensions);

        // Phase 2: parallel per-file taint analysis.
        let stored = StoredCorrelator::new();
        let visited = Mutex::new(FxHashSet::default());
        let (tx, rx) = crossbeam_channel::unbounded();

        let (converged, scanned) = {
            let channel_reporter = ChannelReporter::new(tx);
            let cx = RunContext {
                catalog: &self.catalog,
                program: &registry,
                config: &self.config,
                extensions: &self.extensions,
                reporter: &channel_reporter,
                stored: &stored,
                visited: &visited,
            };

            let converged = registry
                .files()
                .par_iter()
                .map(|file| {
                    if cancelled.load(Ordering::Relaxed) {
                        return true;
                    }
                    debug!(path = %file.path, "analyzing file");
                    analyze_file(&cx, file)
                })
                .reduce(|| true, |a, b| a && b);

            // Phase 3: scan every subroutine the call graph never
            // reached, purely for sink findings.
            let mut scanned = 0;
            if self.config.scan_all_subroutines {
                for decl in registry.all_subroutines() {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    let key = Arc::as_ptr(&decl.node) as usize;
                    if visited.lock().expect("visited mutex poisoned").contains(&key) {
                        continue;
                    }
                    analyze_subroutine_default(&cx, &decl);
                    scanned += 1;
                }
            }
            (converged, scanned)
            // channel_reporter drops here, closing the sender.
        };

        let mut findings: Vec<Finding> = rx.try_iter().collect();
        findings.sort_by(|a, b| {
            (a.file.as_str(), a.line, a.kind).cmp(&(b.file.as_str(), b.line, b.kind))
        });
        let direct = findings.len();
        for finding in findings {
            reporter.report(finding);
        }

        // Phase 4: pair stored writes with reads across all files.
        let stored_findings = stored.correlate(reporter);

        for listener in &self.extensions.listeners {
            listener.analysis_finished();
        }

        let stats = AnalysisStats {
            files: registry.files().len(),
            findings: direct + stored_findings,
            stored_findings,
            scanned_subroutines: scanned,
            converged,
            duration: start.elapsed(),
        };
        info!(
            files = stats.files,
            findings = stats.findings,
            stored = stats.stored_findings,
            scanned = stats.scanned_subroutines,
            duration = ?stats.duration,
            "analysis complete"
        );
        stats
    }
}
