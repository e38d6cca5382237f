//! Stored-vulnerability correlation.
//!
//! Persistent-storage writes of tainted data and storage-backed reads
//! reaching sinks are recorded as events during per-file analysis (from
//! parallel workers, hence the mutex). After all files are done,
//! [`StoredCorrelator::correlate`] pairs writes with reads on the same
//! channel and emits the second-order findings.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use seep_core::types::collections::FxHashSet;
use tracing::debug;

use crate::report::{Finding, Reporter, VulnKind};
use crate::taint::types::{TaintKind, TaintSets};

/// A write of possibly tainted data into a named storage channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVulnerabilityInfo {
    pub channel: String,
    /// The writing function (`update_option`, ...).
    pub origin: String,
    /// Taint of the written value at the write site.
    pub taints: TaintSets,
    pub file: String,
    pub line: u32,
    pub include_stack: Vec<String>,
    pub call_stack: Vec<String>,
    /// Set during correlation when some sink reads this channel back.
    pub read_back: bool,
}

/// A storage-backed value reaching a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReadInfo {
    pub channel: String,
    /// The reading function (`get_option`, ...).
    pub origin: String,
    /// Sink kind the read value flowed into.
    pub sink_kind: TaintKind,
    pub file: String,
    pub line: u32,
    pub include_stack: Vec<String>,
    pub call_stack: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    writes: Vec<StoredVulnerabilityInfo>,
    reads: Vec<StoredReadInfo>,
    seen_writes: FxHashSet<(String, String, u32)>,
    seen_reads: FxHashSet<(String, String, u32, TaintKind)>,
}

/// Accumulates stored-taint events across the whole run.
#[derive(Debug, Default)]
pub struct StoredCorrelator {
    inner: Mutex<Inner>,
}

impl StoredCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tainted write. Re-visits of the same site during
    /// fixpoint iteration are deduplicated.
    pub fn record_write(&self, info: StoredVulnerabilityInfo) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        let key = (info.channel.clone(), info.file.clone(), info.line);
        if inner.seen_writes.insert(key) {
            debug!(channel = %info.channel, file = %info.file, line = info.line, "stored write");
            inner.writes.push(info);
        } else if let Some(existing) = inner
            .writes
            .iter_mut()
            .find(|w| w.channel == info.channel && w.file == info.file && w.line == info.line)
        {
            // Later passes can see stronger taint at the same site.
            existing.taints = existing.taints.merge(&info.taints);
        }
    }

    /// Record a storage-backed value reaching a sink.
    pub fn record_read(&self, info: StoredReadInfo) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        let key = (info.channel.clone(), info.file.clone(), info.line, info.sink_kind);
        if inner.seen_reads.insert(key) {
            debug!(channel = %info.channel, file = %info.file, line = info.line, "stored read");
            inner.reads.push(info);
        }
    }

    /// Pair writes with reads on the same channel and emit stored
    /// findings: one per (write, read, tainted kind).
    pub fn correlate(&self, reporter: &dyn Reporter) -> usize {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        let mut emitted = 0;
        let Inner { writes, reads, .. } = &mut *inner;
        for write in writes.iter_mut() {
            for read in reads.iter().filter(|r| r.channel == write.channel) {
                write.read_back = true;
                for kind in TaintKind::ALL {
                    if !write.taints.get(kind).is_tainted() {
                        continue;
                    }
                    reporter.report(Finding {
                        kind: VulnKind::stored(kind),
                        message: format!("stored {kind} vulnerability found"),
                        file: read.file.clone(),
                        line: read.line,
                        include_stack: read.include_stack.clone(),
                        call_stack: read.call_stack.clone(),
                        candidates: vec![format!(
                            "{}:{} {}('{}')",
                            write.file, write.line, write.origin, write.channel
                        )],
                    });
                    emitted += 1;
                }
            }
        }
        emitted
    }

    /// Write records seen so far (read-back flags reflect the last
    /// correlation pass).
    pub fn writes(&self) -> Vec<StoredVulnerabilityInfo> {
        self.inner.lock().expect("correlator mutex poisoned").writes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingReporter;

    fn write(channel: &str, taints: TaintSets, line: u32) -> StoredVulnerabilityInfo {
        StoredVulnerabilityInfo {
            channel: channel.into(),
            origin: "update_option".into(),
            taints,
            file: "w.php".into(),
            line,
            include_stack: vec!["w.php".into()],
            call_stack: vec![],
            read_back: false,
        }
    }

    fn read(channel: &str, kind: TaintKind, line: u32) -> StoredReadInfo {
        StoredReadInfo {
            channel: channel.into(),
            origin: "get_option".into(),
            sink_kind: kind,
            file: "r.php".into(),
            line,
            include_stack: vec!["r.php".into()],
            call_stack: vec![],
        }
    }

    #[test]
    fn pairs_write_and_read_on_same_channel() {
        let correlator = StoredCorrelator::new();
        correlator.record_write(write("key", TaintSets::tainted(), 3));
        correlator.record_read(read("key", TaintKind::Xss, 8));
        let reporter = CollectingReporter::new();
        // Tainted for both kinds at the write site: one stored finding
        // per kind.
        assert_eq!(correlator.correlate(&reporter), 2);
        let kinds: Vec<VulnKind> = reporter.findings().iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&VulnKind::StoredXss));
        assert!(kinds.contains(&VulnKind::StoredSqlInjection));
        assert!(correlator.writes()[0].read_back);
    }

    #[test]
    fn different_channels_do_not_pair() {
        let correlator = StoredCorrelator::new();
        correlator.record_write(write("a", TaintSets::tainted(), 3));
        correlator.record_read(read("b", TaintKind::Xss, 8));
        let reporter = CollectingReporter::new();
        assert_eq!(correlator.correlate(&reporter), 0);
        assert!(!correlator.writes()[0].read_back);
    }

    #[test]
    fn untainted_write_never_fires() {
        let correlator = StoredCorrelator::new();
        correlator.record_write(write("key", TaintSets::empty(), 3));
        correlator.record_read(read("key", TaintKind::Xss, 8));
        let reporter = CollectingReporter::new();
        assert_eq!(correlator.correlate(&reporter), 0);
    }

    #[test]
    fn revisited_sites_deduplicate() {
        let correlator = StoredCorrelator::new();
        correlator.record_write(write("key", TaintSets::tainted(), 3));
        correlator.record_write(write("key", TaintSets::tainted(), 3));
        correlator.record_read(read("key", TaintKind::Xss, 8));
        correlator.record_read(read("key", TaintKind::Xss, 8));
        let reporter = CollectingReporter::new();
        assert_eq!(correlator.correlate(&reporter), 2);
    }
}
