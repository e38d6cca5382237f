//! Findings and the reporter seam.
//!
//! The engine pushes findings through the [`Reporter`] trait; the host
//! decides what to do with them. Appends must be safe from parallel
//! per-file analyses, so implementors serialize internally.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::taint::types::TaintKind;

/// Category of a reported vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VulnKind {
    SqlInjection,
    Xss,
    StoredSqlInjection,
    StoredXss,
}

impl VulnKind {
    pub fn direct(kind: TaintKind) -> Self {
        match kind {
            TaintKind::Sql => VulnKind::SqlInjection,
            TaintKind::Xss => VulnKind::Xss,
        }
    }

    pub fn stored(kind: TaintKind) -> Self {
        match kind {
            TaintKind::Sql => VulnKind::StoredSqlInjection,
            TaintKind::Xss => VulnKind::StoredXss,
        }
    }
}

/// One structured finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: VulnKind,
    pub message: String,
    /// File the sink call sits in.
    pub file: String,
    pub line: u32,
    /// File inclusion chain active at the finding site, outermost
    /// first.
    pub include_stack: Vec<String>,
    /// Function/method call chain active at the finding site,
    /// outermost first, formatted `name:line`.
    pub call_stack: Vec<String>,
    /// Resolved declaration candidates for the innermost call,
    /// formatted `file:function`.
    pub candidates: Vec<String>,
}

/// Finding sink. Implementations must serialize their own appends.
pub trait Reporter: Send + Sync {
    fn report(&self, finding: Finding);
}

/// Reporter that accumulates findings in memory behind a mutex.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    findings: Mutex<Vec<Finding>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().expect("reporter mutex poisoned").clone()
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings.into_inner().expect("reporter mutex poisoned")
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, finding: Finding) {
        self.findings.lock().expect("reporter mutex poisoned").push(finding);
    }
}

/// Reporter forwarding into a crossbeam channel, used by the engine to
/// stream findings out of parallel workers toward the host reporter.
pub struct ChannelReporter {
    tx: crossbeam_channel::Sender<Finding>,
}

impl ChannelReporter {
    pub fn new(tx: crossbeam_channel::Sender<Finding>) -> Self {
        Self { tx }
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, finding: Finding) {
        // A dropped receiver means the run is shutting down; losing the
        // finding is the intended behavior then.
        let _ = self.tx.send(finding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: VulnKind, line: u32) -> Finding {
        Finding {
            kind,
            message: format!("{kind:?} vulnerability found"),
            file: "a.php".into(),
            line,
            include_stack: vec!["a.php".into()],
            call_stack: vec![],
            candidates: vec![],
        }
    }

    #[test]
    fn collecting_reporter_accumulates() {
        let reporter = CollectingReporter::new();
        reporter.report(finding(VulnKind::Xss, 3));
        reporter.report(finding(VulnKind::SqlInjection, 9));
        assert_eq!(reporter.findings().len(), 2);
    }

    #[test]
    fn findings_serialize() {
        let f = finding(VulnKind::StoredXss, 12);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("StoredXss"));
    }
}
